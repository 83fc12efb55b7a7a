//! outlay-core
//!
//! Core of the expense-reimbursement robot: drains a queue of outlay
//! requests, creates one ticket per request in the ERP portal and keeps the
//! intake ledger in step.
//!
//! # Modules
//! - **domain**: ids, status, queue elements, outcomes, errors
//! - **ports**: capability traits (WorkQueue, ReceiptFetcher, SessionFactory, TicketSubmitter, StatusSink, DocumentLibrary)
//! - **app**: TaskProcessor, WorkerLoop, BatchArchiver, QueueCounts
//! - **impls**: in-memory and SQLite queues, Excel ledger, OS2Forms, SharePoint, Chrome (CDP)
//! - **config**: TOML robot configuration

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
