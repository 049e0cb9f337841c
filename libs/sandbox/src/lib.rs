//! Sandboxed execution harness.
//!
//! One job at a time: an ephemeral workspace is created on tmpfs, the
//! submitted code is written under its canonical filename, the language
//! plan is compiled (when the language needs it) and run inside a
//! locked-down container, and stdout/stderr are captured with bounded
//! sizes. Every exit path - success, timeout, crash, panic - releases the
//! workspace.
//!
//! Enforced limits per run:
//! - wall-clock deadline (time limit + startup buffer), kill on expiry
//! - CPU-time ulimit of `ceil(time_limit_ms / 1000)` seconds
//! - memory + disabled swap, PID cap
//! - no network (loopback only), all capabilities dropped,
//!   no-new-privileges, non-root UID, read-only rootfs with a size-capped
//!   tmpfs at `/tmp`

mod error;
mod harness;
mod languages;
mod limits;
mod protocol;
mod runtime;
mod workspace;

pub use error::SandboxError;
pub use harness::{
    CaseRun, ExecutionHarness, ExecutionOutcome, ExecutionReport, ExecutionRequest, HarnessConfig,
    RunStatus, TestCase,
};
pub use languages::{Language, LanguagePlan};
pub use limits::ResourceLimits;
pub use protocol::{parse_runner_output, truncate_with_marker, RunnerReport, OUTPUT_CAP_PAYLOAD,
    OUTPUT_CAP_RAW, RESULT_PREFIX};
pub use runtime::{ContainerRuntime, DockerRuntime, RunOutput, RunSpec};
pub use workspace::{sweep_stale_workspaces, JobWorkspace};
