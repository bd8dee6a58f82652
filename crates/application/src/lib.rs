//! Application services and ports.

#![forbid(unsafe_code)]

mod locker_ports;
mod locker_service;
mod task_dispatch;

#[cfg(test)]
mod testing;

pub use locker_ports::{
    AlertSink, Clock, DEFAULT_QUEUE, DeliveredTask, EmailService, EntityStore, EntityWrite,
    ExpectedVersion, LivenessOracle, QueuedTask, RequestLog, SystemClock, TaskQueue,
    VersionedEntity, WriteBatch,
};
pub use locker_service::{ChainEntity, Locker, LockerConfig, NextTask};
pub use task_dispatch::{
    DispatchOutcome, DispatchReport, TaskDispatcher, TaskHandler, TaskRoute, TaskRouter, TaskStep,
};
