#![allow(dead_code)]

use std::path::{Path, PathBuf};

use cmdq::{Backend, BackendKind, JobSpec, Queue, QueueOptions, SlurmOptions, TmuxOptions};

/// Builder for a test [`Queue`] rooted in a caller-provided directory.
pub struct QueueBuilder {
    name: String,
    backend: Backend,
    opts: QueueOptions,
    headers: Vec<String>,
    jobs: Vec<JobSpec>,
}

impl QueueBuilder {
    pub fn new(name: &str) -> Self {
        QueueBuilder {
            name: name.to_string(),
            backend: Backend::with_defaults(BackendKind::Serial),
            opts: QueueOptions::default(),
            headers: Vec::new(),
            jobs: Vec::new(),
        }
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    pub fn tmux(self, size: usize) -> Self {
        self.backend(Backend::Tmux(TmuxOptions {
            size,
            ..TmuxOptions::default()
        }))
    }

    pub fn slurm(self) -> Self {
        self.backend(Backend::Slurm(SlurmOptions::default()))
    }

    pub fn dpath(mut self, dpath: impl AsRef<Path>) -> Self {
        self.opts.dpath = Some(PathBuf::from(dpath.as_ref()));
        self
    }

    pub fn environ(mut self, key: &str, value: &str) -> Self {
        self.opts.environ.push((key.to_string(), value.to_string()));
        self
    }

    pub fn exclude_tag(mut self, tag: &str) -> Self {
        self.opts.exclude_tags.push(tag.to_string());
        self
    }

    pub fn header(mut self, command: &str) -> Self {
        self.headers.push(command.to_string());
        self
    }

    pub fn job(mut self, spec: JobSpec) -> Self {
        self.jobs.push(spec);
        self
    }

    pub fn build(self) -> Queue {
        let mut queue = Queue::new(&self.name, self.backend, self.opts);
        for header in self.headers {
            queue.add_header_command(header);
        }
        for spec in self.jobs {
            queue.submit(spec).expect("submitting job from builder");
        }
        queue
    }
}
