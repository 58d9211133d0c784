//! # Code Duel
//!
//! Core of a head-to-head competitive programming service: two players are paired on the same
//! problem and the first one whose C submission passes every test of the problem's harness
//! wins the duel.
//!
//! It provides:
//! - FIFO matchmaking of waiting players into duels ([`matchmaking`])
//! - The duel state machine, with lazy expiry of duels nobody works on ([`lifecycle`])
//! - A sandbox runner compiling submissions into a harness and running them under time and
//!   memory limits enforced through Linux cgroups v2 and rlimits ([`sandbox`])
//! - Structured verdicts built from the harness output ([`verdict`])
//!
//! Storage is abstracted behind the [`repository`] traits; in-memory implementations are
//! provided. Identity and transport are left to the embedding service, which calls the
//! [`DuelServer`](crate::server::DuelServer) operations on behalf of an authenticated player.
//!
//! # Documentation Overview
//!
//! - For the operations exposed to clients, see the [`server`] module.
//! - For limits, timeouts and the execution environment, see
//!   [`Configuration`](crate::configuration::Configuration).
//! - For the harness contract (the `{user_code}` marker and the `TEST_<n>_STATUS=` output
//!   lines), see the [`sandbox`] module.
//!
//! # Harness Example
//!
//! ```c
//! #include <stdio.h>
//!
//! {user_code}
//!
//! int main(void) {
//!     int ok = add(2, 3) == 5;
//!     printf("TEST_1_STATUS=%s\n", ok ? "PASS" : "FAIL");
//!     printf("TEST_1_MESSAGE=add(2, 3)\n");
//!     return ok ? 0 : 1;
//! }
//! ```

mod cgroup_manager;
pub use anyhow;
pub mod configuration;
pub mod error;
pub mod history;
pub mod lifecycle;
mod logger;
pub mod matchmaking;
pub mod models;
pub mod repository;
pub mod sandbox;
pub mod server;
pub mod verdict;

/// Commonly used types and traits for quick access.
///
/// ```rust
/// use code_duel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::configuration::Configuration;
    pub use crate::error::DuelError;
    pub use crate::matchmaking::{CancelOutcome, PollOutcome};
    pub use crate::models::{Difficulty, Duel, DuelId, DuelStatus, PlayerId, Problem, ProblemId};
    pub use crate::repository::{
        DuelRepository, InMemoryDuelRepository, InMemoryProblemRepository, ProblemRepository,
    };
    pub use crate::sandbox::{Judge, SandboxRunner};
    pub use crate::server::DuelServer;
    pub use crate::verdict::{TestStatus, Verdict, VerdictStatus};
}
