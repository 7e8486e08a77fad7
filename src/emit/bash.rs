// src/emit/bash.rs

//! Transpile jobs into self-checking bash.
//!
//! The emitted block for one job:
//! 1. banner `### Command i/N - <name>`
//! 2. wait loops for dependencies running on other workers
//! 3. a guard that skips the job unless every dependency has a `.pass` file
//! 4. `started` status write, the command (optionally teed to a log,
//!    optionally serialised under `flock`), exit-code capture
//! 5. `.pass`/`.fail` touch-file plus a final `.stat` line
//!
//! The block never `exit`s on failure: it falls through so that the guards
//! of later jobs can observe the failure. Status probes use file existence
//! only (`test -e`), never file content, so readers are immune to partial
//! writes.

use std::path::Path;

use crate::graph::Job;
use crate::session::SessionDirs;

/// Flags controlling how much scaffolding is emitted around each command.
///
/// With everything off the output is just the raw commands, which is what
/// `print_commands` shows in its terse mode.
#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    /// Write `started/passed/failed/skipped` status files.
    pub with_status: bool,
    /// Emit dependency guards and the `set +e -x` bracketing.
    pub with_guards: bool,
    /// Serialise every job under `flock` on the session lock file.
    pub with_locks: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            with_status: true,
            with_guards: true,
            with_locks: false,
        }
    }
}

/// Extra lines spliced into a job's outcome branches. Used by the script
/// builder to maintain pass/fail/skip counters and by callers for
/// sub-queue gating.
#[derive(Debug, Clone, Default)]
pub struct Conditionals {
    pub on_pass: Vec<String>,
    pub on_fail: Vec<String>,
    pub on_skip: Vec<String>,
}

/// One job plus its position and dependency placement within a script.
#[derive(Debug)]
pub struct JobEmit<'a> {
    pub job: &'a Job,
    /// 1-based position among the queue's real jobs.
    pub index: usize,
    /// Total real jobs in the queue.
    pub total: usize,
    /// Dependencies emitted earlier in this same script.
    pub local_deps: Vec<String>,
    /// Dependencies assigned to other workers; guarded by wait loops.
    pub remote_deps: Vec<String>,
}

/// Quote a string for safe use inside single quotes in shell.
pub fn shell_single_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(c);
        }
    }
    out.push('\'');
    out
}

fn indent(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .map(|line| {
            if line.is_empty() {
                line.clone()
            } else {
                format!("    {line}")
            }
        })
        .collect()
}

fn path_str(path: &Path) -> String {
    path.display().to_string()
}

/// Emit the bash block for a single job.
pub fn emit_job_block(
    session: &SessionDirs,
    emit: &JobEmit<'_>,
    opts: &EmitOptions,
    conditionals: &Conditionals,
) -> String {
    let job = emit.job;

    if job.bookkeeper {
        // Bookkeeping jobs carry their own plumbing; no guards, no status.
        return format!("# bookkeeper: {}\n{}\n", job.name, job.command);
    }

    let paths = session.job_paths(&job.name);
    let mut lines: Vec<String> = Vec::new();

    lines.push("#".to_string());
    lines.push(format!("### Command {}/{} - {}", emit.index, emit.total, job.name));
    lines.push("#".to_string());
    if let Some(hints) = hint_comment(job) {
        lines.push(hints);
    }

    if opts.with_guards {
        for dep in &emit.remote_deps {
            let dep_paths = session.job_paths(dep);
            lines.push(format!("# Wait for '{dep}' (assigned to another worker)"));
            lines.push(format!(
                "until [ -e \"{}\" ] || [ -e \"{}\" ] || [ -e \"{}\" ]; do",
                path_str(&dep_paths.pass_fpath),
                path_str(&dep_paths.fail_fpath),
                path_str(&dep_paths.skip_fpath),
            ));
            lines.push("    sleep 1".to_string());
            lines.push("done".to_string());
        }
    }

    // The run path: status, command, exit-code capture, outcome.
    let mut body: Vec<String> = Vec::new();

    if opts.with_status {
        body.push(format!(
            "printf 'started %s\\n' \"$(date +%s)\" > \"{}\"",
            path_str(&paths.stat_fpath)
        ));
    }

    if opts.with_guards {
        // +e lets the command fail without killing the script; -x echoes it.
        body.push("set +e -x".to_string());
    }

    let mut command_part = job.command.clone();
    if opts.with_locks {
        command_part = format!(
            "( flock 9; {} ) 9>>\"{}\"",
            command_part,
            path_str(&session.lock_fpath())
        );
    }

    let logged = job.log && opts.with_status;
    if logged {
        body.push(format!(
            "( {} ) 2>&1 | tee \"{}\"",
            command_part,
            path_str(&paths.log_fpath)
        ));
    } else {
        body.push(command_part);
    }

    // PIPESTATUS[0] holds the command's own exit code even through tee, and
    // survives into the brace group below.
    let ret_src = if logged { "${PIPESTATUS[0]}" } else { "$?" };
    if opts.with_guards {
        body.push(format!("{{ _CMDQ_RET={ret_src}; set +x -e; }} 2>/dev/null"));
    } else if opts.with_status {
        body.push(format!("_CMDQ_RET={ret_src}"));
    }

    if opts.with_status {
        body.push("if [ \"$_CMDQ_RET\" -eq \"0\" ]; then".to_string());
        let mut on_pass = vec![
            format!("touch \"{}\"", path_str(&paths.pass_fpath)),
            format!(
                "printf 'passed %s %s\\n' \"$(date +%s)\" \"$_CMDQ_RET\" > \"{}\"",
                path_str(&paths.stat_fpath)
            ),
        ];
        on_pass.extend(conditionals.on_pass.iter().cloned());
        body.extend(indent(&on_pass));
        body.push("else".to_string());
        let mut on_fail = vec![
            format!("touch \"{}\"", path_str(&paths.fail_fpath)),
            format!(
                "printf 'failed %s %s\\n' \"$(date +%s)\" \"$_CMDQ_RET\" > \"{}\"",
                path_str(&paths.stat_fpath)
            ),
        ];
        on_fail.extend(conditionals.on_fail.iter().cloned());
        body.extend(indent(&on_fail));
        body.push("fi".to_string());
    }

    let all_deps: Vec<&String> = emit.local_deps.iter().chain(emit.remote_deps.iter()).collect();
    if opts.with_guards && !all_deps.is_empty() {
        let condition = all_deps
            .iter()
            .map(|dep| {
                let dep_paths = session.job_paths(dep);
                format!("[ -e \"{}\" ]", path_str(&dep_paths.pass_fpath))
            })
            .collect::<Vec<_>>()
            .join(" && ");
        lines.push(format!("if {condition}; then"));
        lines.extend(indent(&body));
        lines.push("else".to_string());
        let mut on_skip = Vec::new();
        if opts.with_status {
            on_skip.push(format!("touch \"{}\"", path_str(&paths.skip_fpath)));
            on_skip.push(format!(
                "printf 'skipped %s\\n' \"$(date +%s)\" > \"{}\"",
                path_str(&paths.stat_fpath)
            ));
        } else {
            on_skip.push(":".to_string());
        }
        on_skip.extend(conditionals.on_skip.iter().cloned());
        lines.extend(indent(&on_skip));
        lines.push("fi".to_string());
    } else {
        lines.extend(body);
    }

    lines.push(String::new());
    lines.join("\n")
}

fn hint_comment(job: &Job) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(cpus) = job.cpus {
        parts.push(format!("cpus={cpus}"));
    }
    if let Some(gpus) = job.gpus {
        parts.push(format!("gpus={gpus}"));
    }
    if let Some(ref mem) = job.mem {
        parts.push(format!("mem={mem}"));
    }
    if let Some(ref partition) = job.partition {
        parts.push(format!("partition={partition}"));
    }
    if let Some(ref begin) = job.begin {
        parts.push(format!("begin={begin}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("# hints: {}", parts.join(" ")))
    }
}

/// Assembles a full worker script: shebang, environ, working directory,
/// header commands, per-job blocks with progress counters, and a final
/// summary line. Shared by the serial backend and each tmux worker.
pub struct ScriptBuilder<'a> {
    pub session: &'a SessionDirs,
    pub shebang: &'a str,
    pub environ: &'a [(String, String)],
    pub cwd: Option<&'a Path>,
    pub header_commands: &'a [String],
    pub opts: EmitOptions,
}

impl<'a> ScriptBuilder<'a> {
    /// Render the script for the given jobs.
    ///
    /// `total_real` is the number of real jobs in the whole queue (used for
    /// the `i/N` banners and the summary denominator). `trailer` is
    /// appended verbatim at the end, after the summary.
    pub fn build(&self, jobs: &[JobEmit<'_>], total_real: usize, trailer: Option<&str>) -> String {
        let mut script: Vec<String> = Vec::new();

        script.push(self.shebang.to_string());
        script.push(format!("# Generated by cmdq {}", env!("CARGO_PKG_VERSION")));
        if self.opts.with_guards {
            script.push("set -e".to_string());
        }
        script.push(format!("mkdir -p \"{}\"", path_str(&self.session.job_info_dpath())));
        if self.opts.with_status && jobs.iter().any(|j| j.job.log && !j.job.bookkeeper) {
            script.push(format!("mkdir -p \"{}\"", path_str(&self.session.log_dpath())));
        }

        if self.opts.with_status {
            script.push(String::new());
            script.push("# Track how many jobs reach each terminal state".to_string());
            script.push("(( \"_CMDQ_NUM_PASSED=0\" )) || true".to_string());
            script.push("(( \"_CMDQ_NUM_FAILED=0\" )) || true".to_string());
            script.push("(( \"_CMDQ_NUM_SKIPPED=0\" )) || true".to_string());
            script.push(format!("_CMDQ_TOTAL={total_real}"));
        }

        if !self.environ.is_empty() {
            script.push(String::new());
            script.push("# Environment".to_string());
            for (key, value) in self.environ {
                script.push(format!("export {key}=\"{value}\""));
            }
        }

        if let Some(cwd) = self.cwd {
            script.push(String::new());
            script.push("# Working directory".to_string());
            script.push(format!("cd \"{}\"", path_str(cwd)));
        }

        if !self.header_commands.is_empty() {
            script.push(String::new());
            script.push("# Header commands".to_string());
            for command in self.header_commands {
                script.push(command.clone());
            }
        }

        if !jobs.is_empty() {
            script.push(String::new());
            script.push("# ----".to_string());
            script.push("# Jobs".to_string());
            script.push("# ----".to_string());
            script.push(String::new());

            let conditionals = self.counter_conditionals();
            for emit in jobs {
                script.push(emit_job_block(self.session, emit, &self.opts, &conditionals));
            }
        }

        if self.opts.with_status {
            script.push("# Final status of this worker".to_string());
            script.push(
                "printf 'cmdq status: passed=%s failed=%s skipped=%s total=%s\\n' \\"
                    .to_string(),
            );
            script.push(
                "    \"$_CMDQ_NUM_PASSED\" \"$_CMDQ_NUM_FAILED\" \"$_CMDQ_NUM_SKIPPED\" \"$_CMDQ_TOTAL\""
                    .to_string(),
            );
        }

        if self.opts.with_guards {
            script.push("set +e".to_string());
        }

        if let Some(trailer) = trailer {
            script.push(String::new());
            script.push(trailer.to_string());
        }

        script.push(String::new());
        script.join("\n")
    }

    fn counter_conditionals(&self) -> Conditionals {
        if !self.opts.with_status {
            return Conditionals::default();
        }
        Conditionals {
            on_pass: vec!["(( \"_CMDQ_NUM_PASSED=_CMDQ_NUM_PASSED+1\" )) || true".to_string()],
            on_fail: vec!["(( \"_CMDQ_NUM_FAILED=_CMDQ_NUM_FAILED+1\" )) || true".to_string()],
            on_skip: vec!["(( \"_CMDQ_NUM_SKIPPED=_CMDQ_NUM_SKIPPED+1\" )) || true".to_string()],
        }
    }
}
