//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - Creating temporary git repositories
//! - Deterministic task executors
//! - Predefined assignment sets

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use conclave::core::{AgentKind, Assignment, ScoringMetrics, TaskOutcome};
use conclave::orchestration::{ExecutionContext, TaskExecutor};
use conclave::Result;

/// A test repository with a temporary directory and initialized git.
pub struct TestRepo {
    /// The temporary directory containing the repo.
    pub temp_dir: TempDir,
    /// Path to the repository root.
    pub path: PathBuf,
}

impl TestRepo {
    /// Create a new test repository on `main` with an initial commit.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();

        git(&path, &["init"]);
        git(&path, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        git(&path, &["config", "user.email", "test@test.com"]);
        git(&path, &["config", "user.name", "Test User"]);
        git(&path, &["config", "commit.gpgsign", "false"]);

        std::fs::write(path.join("README.md"), "# Test Repository\n")
            .expect("Failed to write README");
        git(&path, &["add", "."]);
        git(&path, &["commit", "-m", "Initial commit"]);

        Self { temp_dir, path }
    }

    /// Create a file and commit it on the current branch.
    pub fn create_and_commit(&self, filename: &str, content: &str, message: &str) -> String {
        let file_path = self.path.join(filename);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent");
        }
        std::fs::write(&file_path, content).expect("Failed to write file");
        git(&self.path, &["add", filename]);
        git(&self.path, &["commit", "-m", message]);
        self.head()
    }

    pub fn head(&self) -> String {
        git(&self.path, &["rev-parse", "HEAD"])
    }

    /// Get the current branch name.
    pub fn current_branch(&self) -> String {
        git(&self.path, &["rev-parse", "--abbrev-ref", "HEAD"])
    }

    /// Check if a branch exists.
    pub fn branch_exists(&self, name: &str) -> bool {
        !git(&self.path, &["branch", "--list", name]).is_empty()
    }

    /// Subjects of the commits on the current branch, newest first.
    pub fn log_subjects(&self) -> Vec<String> {
        git(&self.path, &["log", "--format=%s"])
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// True when the shared tree has no uncommitted changes.
    pub fn is_clean(&self) -> bool {
        git(&self.path, &["status", "--porcelain"]).is_empty()
    }

    pub fn read(&self, filename: &str) -> String {
        std::fs::read_to_string(self.path.join(filename)).expect("Failed to read file")
    }
}

impl Default for TestRepo {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, panicking on failure, and return trimmed stdout.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an assignment whose description is its id.
pub fn step(id: &str) -> Assignment {
    Assignment::new(id, AgentKind::Claude, id)
}

/// `count` assignments with no dependencies.
pub fn independent_steps(count: usize) -> Vec<Assignment> {
    (0..count).map(|i| step(&format!("step-{}", i))).collect()
}

/// Diamond: `a` feeds `b` and `c`, which both feed `d`.
///
/// ```text
///     a
///    / \
///   b   c
///    \ /
///     d
/// ```
pub fn diamond() -> Vec<Assignment> {
    vec![
        step("d").depends_on(["b", "c"]),
        step("b").depends_on(["a"]),
        step("c").depends_on(["a"]),
        step("a"),
    ]
}

/// Scripted behaviour of one step in a [`FakeExecutor`].
#[derive(Debug, Clone)]
pub enum Script {
    Succeed(ScoringMetrics),
    Fail(String),
    Error(String),
    /// Write `content` to `file` in the step's working directory, then succeed.
    WriteFile { file: String, content: String },
}

/// Deterministic executor that tracks concurrency and start order.
///
/// Steps without a script succeed with default metrics.
pub struct FakeExecutor {
    scripts: HashMap<String, Script>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<String>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            delay: Duration::from_millis(25),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            started: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(mut self, step_id: &str, script: Script) -> Self {
        self.scripts.insert(step_id.to_string(), script);
        self
    }

    /// Highest number of steps observed executing at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Step ids in the order they started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    async fn perform(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> Result<TaskOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(assignment.step_id.clone());

        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        match self.scripts.get(&assignment.step_id) {
            None => Ok(TaskOutcome::success(&assignment.step_id, ScoringMetrics::default())),
            Some(Script::Succeed(metrics)) => {
                Ok(TaskOutcome::success(&assignment.step_id, *metrics))
            }
            Some(Script::Fail(message)) => Ok(TaskOutcome::failure(message.clone())),
            Some(Script::Error(message)) => {
                Err(conclave::Error::Validation(message.clone()))
            }
            Some(Script::WriteFile { file, content }) => {
                std::fs::write(ctx.workdir.join(file), content)?;
                Ok(TaskOutcome::success(&assignment.step_id, ScoringMetrics::default()))
            }
        }
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskExecutor for FakeExecutor {
    fn execute(
        &self,
        assignment: &Assignment,
        ctx: &ExecutionContext,
    ) -> impl Future<Output = Result<TaskOutcome>> + Send {
        self.perform(assignment, ctx)
    }
}

/// Metrics whose score under the default weights grows with `quality`.
pub fn metrics(quality: f64) -> ScoringMetrics {
    ScoringMetrics {
        test_success_rate: quality,
        lint_pass_rate: quality,
        performance_delta: 0.0,
        change_risk: 1.0 - quality,
        readability: quality,
        security: quality,
    }
}
