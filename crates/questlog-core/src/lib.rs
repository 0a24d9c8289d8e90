//! # Questlog Core Library
//!
//! Core logic for questlog, a gamified task tracker. Completing a task earns
//! XP, extends its streak, may raise the user's level and rolls recurring
//! tasks over to their next occurrence. A CLI-first design: every operation
//! is reachable through [`Engine`], and front ends stay thin.
//!
//! ## Architecture
//!
//! - **Pure rules**: [`recurrence`], [`streak`], [`scoring`], [`leveling`],
//!   [`balance`] and the completion planner in [`completion`] take values in
//!   and return values out. No clocks, no I/O.
//! - **Storage**: SQLite persistence behind the [`EngineStore`] trait and
//!   TOML configuration
//! - **Engine**: [`Engine`] loads state from a store, runs the rules and
//!   commits the results under per-task and per-user locks
//! - **Stats**: digests, snapshots and streak overviews built from stored state
//!
//! ## Key Components
//!
//! - [`Engine`]: the service front ends call
//! - [`Database`]: SQLite implementation of [`EngineStore`]
//! - [`Config`]: user profile and policy tuning

pub mod balance;
pub mod completion;
pub mod domain;
pub mod engine;
pub mod error;
pub mod leveling;
pub mod recurrence;
pub mod reward;
pub mod scoring;
pub mod stats;
pub mod storage;
pub mod streak;
pub mod task;
pub mod user;

pub use balance::{BalancePolicy, DomainTotals};
pub use completion::{Completion, CompletionReport, CompletionResult, Policies, Rollover};
pub use domain::{Domain, DomainId};
pub use engine::{DigestKind, Engine, SubtaskToggle};
pub use error::{ConfigError, CoreError, DatabaseError, Result, ValidationError};
pub use leveling::{LevelCurve, LevelState};
pub use recurrence::{Recurrence, RecurrenceClass};
pub use reward::{ClaimOutcome, NewReward, Reward, RewardId};
pub use scoring::{ScoringPolicy, XpBreakdown, XpTerm};
pub use stats::{DailyDigest, StatsSnapshot, StreakOverview, WeeklyReview};
pub use storage::{Config, Database, EngineStore, StoreReads, StoreTx};
pub use streak::{StreakPolicy, StreakState, StreakTransition};
pub use task::{EnergyLevel, NewTask, Priority, Subtask, Task, TaskId, TaskStatus, TimeHorizon};
pub use user::{NewUser, User, UserId};
