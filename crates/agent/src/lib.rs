//! Conversation runtime and queue worker.
//!
//! A message travels: queue → [`worker::QueueWorker`] → [`runtime::ConversationRuntime`]
//! (session lookup, onboarding flow, command routing) → [`executors::ExecutorRegistry`]
//! for confirmed actions → one reply through a [`notify::Notifier`].
//!
//! Nothing that changes inventory runs without an explicit confirmation, except
//! rainfall, which only appends to the ledger.

pub mod broadcast;
pub mod executors;
pub mod notify;
pub mod replies;
pub mod runtime;
pub mod worker;

pub use broadcast::{BroadcastReport, ReminderBroadcaster};
pub use executors::{DomainExecutor, ExecutionContext, ExecutionError, ExecutorRegistry};
pub use notify::{notifier_from_config, Notifier, NotifyError, RecordingNotifier};
pub use runtime::{ConversationRuntime, MessageHandler, ProcessingError, TurnReport};
pub use worker::{BatchReport, QueueWorker, WorkerSettings};
