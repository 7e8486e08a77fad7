// src/graph/model.rs

//! In-memory DAG of jobs: submission, naming, dependency resolution, and
//! deterministic topological ordering.
//!
//! The model owns all jobs until emit time; backends only borrow it
//! read-only. Dependencies may be given as [`JobId`]s returned from
//! [`GraphModel::submit`] or as name strings; names are allowed to refer to
//! jobs submitted later, and are resolved when the queue is finalised.

use std::collections::{BTreeSet, HashMap};

use crate::errors::{CmdqError, Result};

/// Index of a job within its queue, in submission order.
pub type JobId = usize;

/// A dependency reference: either a resolved id or a (possibly forward)
/// name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dep {
    Id(JobId),
    Name(String),
}

/// Builder for a job submission.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub(crate) command: String,
    pub(crate) name: Option<String>,
    pub(crate) depends: Vec<Dep>,
    pub(crate) tags: Vec<String>,
    pub(crate) cpus: Option<u32>,
    pub(crate) gpus: Option<u32>,
    pub(crate) mem: Option<String>,
    pub(crate) partition: Option<String>,
    pub(crate) begin: Option<String>,
    pub(crate) log: bool,
}

impl JobSpec {
    pub fn new(command: impl Into<String>) -> Self {
        JobSpec {
            command: command.into(),
            name: None,
            depends: Vec::new(),
            tags: Vec::new(),
            cpus: None,
            gpus: None,
            mem: None,
            partition: None,
            begin: None,
            log: true,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Depend on a job by name. The name may belong to a job submitted
    /// later, as long as it exists by the time the queue is finalised.
    pub fn after(mut self, dep: impl Into<String>) -> Self {
        self.depends.push(Dep::Name(dep.into()));
        self
    }

    /// Depend on a job by the id returned from a previous `submit`.
    pub fn after_job(mut self, id: JobId) -> Self {
        self.depends.push(Dep::Id(id));
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn cpus(mut self, n: u32) -> Self {
        self.cpus = Some(n);
        self
    }

    pub fn gpus(mut self, n: u32) -> Self {
        self.gpus = Some(n);
        self
    }

    /// Memory hint, e.g. `"512MB"` or `"8GB"`. Opaque to the serial and
    /// tmux backends; normalised to megabytes for slurm.
    pub fn mem(mut self, mem: impl Into<String>) -> Self {
        self.mem = Some(mem.into());
        self
    }

    pub fn partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Slurm `--begin` hint (e.g. `"now+60"`, `"18:00"`).
    pub fn begin(mut self, begin: impl Into<String>) -> Self {
        self.begin = Some(begin.into());
        self
    }

    /// Whether the job's stdout/stderr is teed to its log file.
    pub fn log(mut self, log: bool) -> Self {
        self.log = log;
        self
    }
}

/// A submitted job.
#[derive(Debug, Clone)]
pub struct Job {
    pub name: String,
    pub command: String,
    pub depends: Vec<Dep>,
    pub tags: Vec<String>,
    pub cpus: Option<u32>,
    pub gpus: Option<u32>,
    pub mem: Option<String>,
    pub partition: Option<String>,
    pub begin: Option<String>,
    pub log: bool,
    /// Internal poller job; exempt from guards, status files, and progress
    /// accounting. Never set on user submissions.
    pub bookkeeper: bool,
}

impl Job {
    pub(crate) fn from_spec(spec: JobSpec, name: String, depends: Vec<Dep>) -> Self {
        Job {
            name,
            command: spec.command,
            depends,
            tags: spec.tags,
            cpus: spec.cpus,
            gpus: spec.gpus,
            mem: spec.mem,
            partition: spec.partition,
            begin: spec.begin,
            log: spec.log,
            bookkeeper: false,
        }
    }

    /// Construct an internal bookkeeping job. Used by backends only.
    pub(crate) fn bookkeeper(name: impl Into<String>, command: impl Into<String>) -> Self {
        Job {
            name: name.into(),
            command: command.into(),
            depends: Vec::new(),
            tags: Vec::new(),
            cpus: None,
            gpus: None,
            mem: None,
            partition: None,
            begin: None,
            log: false,
            bookkeeper: true,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// The queue's job DAG.
#[derive(Debug, Clone)]
pub struct GraphModel {
    queue_name: String,
    jobs: Vec<Job>,
    by_name: HashMap<String, JobId>,
    /// Sink jobs recorded by the last `sync()`; implicit dependencies for
    /// all future submissions.
    all_depends: Vec<JobId>,
}

impl GraphModel {
    pub fn new(queue_name: impl Into<String>) -> Self {
        GraphModel {
            queue_name: queue_name.into(),
            jobs: Vec::new(),
            by_name: HashMap::new(),
            all_depends: Vec::new(),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn job(&self, id: JobId) -> &Job {
        &self.jobs[id]
    }

    pub fn named_jobs(&self) -> &HashMap<String, JobId> {
        &self.by_name
    }

    /// The implicit dependencies recorded by the last [`GraphModel::sync`].
    pub fn all_depends(&self) -> &[JobId] {
        &self.all_depends
    }

    /// Append a job to the queue.
    ///
    /// Auto-names anonymous jobs as `<queue-name>-job-<N>`. Fails with
    /// [`CmdqError::DuplicateJob`] on a name collision; resubmitting an
    /// identical spec is rejected the same way, never deduplicated.
    pub fn submit(&mut self, spec: JobSpec) -> Result<JobId> {
        let name = match &spec.name {
            Some(name) => name.clone(),
            None => format!("{}-job-{}", self.queue_name, self.jobs.len()),
        };
        if self.by_name.contains_key(&name) {
            return Err(CmdqError::DuplicateJob(name));
        }

        // Implicit dependencies from the last sync() come first.
        let mut depends: Vec<Dep> = self.all_depends.iter().map(|&id| Dep::Id(id)).collect();
        depends.extend(spec.depends.iter().cloned());

        let id = self.jobs.len();
        self.jobs.push(Job::from_spec(spec, name.clone(), depends));
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Mark that all future jobs will depend on the current sink jobs
    /// (jobs that nothing currently depends on).
    pub fn sync(&mut self) {
        let mut has_dependent = vec![false; self.jobs.len()];
        for job in &self.jobs {
            for dep in &job.depends {
                if let Some(id) = self.resolve_dep(dep) {
                    has_dependent[id] = true;
                }
            }
        }
        self.all_depends = (0..self.jobs.len()).filter(|&id| !has_dependent[id]).collect();
    }

    fn resolve_dep(&self, dep: &Dep) -> Option<JobId> {
        match dep {
            Dep::Id(id) => Some(*id),
            Dep::Name(name) => self.by_name.get(name).copied(),
        }
    }

    /// Resolve one job's dependencies to ids, deduplicated in order.
    pub fn resolved_deps(&self, id: JobId) -> Result<Vec<JobId>> {
        let job = &self.jobs[id];
        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for dep in &job.depends {
            let dep_id = self.resolve_dep(dep).ok_or_else(|| {
                let dep_name = match dep {
                    Dep::Name(n) => n.clone(),
                    Dep::Id(i) => format!("#{i}"),
                };
                CmdqError::UnknownDependency {
                    job: job.name.clone(),
                    dep: dep_name,
                }
            })?;
            if seen.insert(dep_id) {
                out.push(dep_id);
            }
        }
        Ok(out)
    }

    /// Resolve the whole edge set: `edges[v]` is the ordered, deduplicated
    /// list of jobs `v` depends on.
    pub fn resolved_edges(&self) -> Result<Vec<Vec<JobId>>> {
        (0..self.jobs.len()).map(|id| self.resolved_deps(id)).collect()
    }

    /// Stable topological order via Kahn's algorithm. The ready set is
    /// keyed on submission index, so ties always follow insertion order and
    /// the output is deterministic.
    ///
    /// Fails with [`CmdqError::CycleDetected`] when the graph has a cycle
    /// (including self-loops), naming one involved job.
    pub fn order_jobs(&self) -> Result<Vec<JobId>> {
        let edges = self.resolved_edges()?;

        for (id, deps) in edges.iter().enumerate() {
            if deps.contains(&id) {
                return Err(CmdqError::CycleDetected(self.jobs[id].name.clone()));
            }
        }

        let n = self.jobs.len();
        let mut in_degree: Vec<usize> = edges.iter().map(|d| d.len()).collect();
        let mut dependents: Vec<Vec<JobId>> = vec![Vec::new(); n];
        for (v, deps) in edges.iter().enumerate() {
            for &u in deps {
                dependents[u].push(v);
            }
        }

        let mut ready: BTreeSet<JobId> =
            (0..n).filter(|&id| in_degree[id] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(id) = ready.pop_first() {
            order.push(id);
            for &v in &dependents[id] {
                in_degree[v] -= 1;
                if in_degree[v] == 0 {
                    ready.insert(v);
                }
            }
        }

        if order.len() != n {
            let stuck = (0..n)
                .find(|&id| in_degree[id] > 0)
                .expect("leftover node implies positive in-degree");
            return Err(CmdqError::CycleDetected(self.jobs[stuck].name.clone()));
        }

        Ok(order)
    }

    /// Number of user-visible jobs (bookkeepers excluded).
    pub fn num_real_jobs(&self) -> usize {
        self.jobs.iter().filter(|j| !j.bookkeeper).count()
    }

    /// Names of all user-visible jobs, in submission order.
    pub fn real_job_names(&self) -> Vec<String> {
        self.jobs
            .iter()
            .filter(|j| !j.bookkeeper)
            .map(|j| j.name.clone())
            .collect()
    }
}
