//! # tenant-backup
//!
//! Backup and restore engine for multi-tenant storage and SQL dumps.
//!
//! ## Features
//!
//! - **File Backups**: Enumerates a tenant's files across the registered storage modules and their domains
//! - **Dump Replay**: Streams table dumps statement by statement into a single transaction
//! - **Statement Repair**: Re-encodes string literals of broken `REPLACE INTO` statements
//! - **Stored Procedures**: Loads routine definitions using a custom `DELIMITER`
//! - **Progress Reporting**: Step-based progress with observers, safe to poll from other threads
//! - **Parallel Processing**: Tenants are processed concurrently on a thread pool
//!
//! ## Quick Start
//!
//! ```no_run
//! use tenant_backup::backup::task::TaskConfig;
//!
//! // Load and validate the YAML configuration
//! let config = TaskConfig::load("config.yml")?;
//!
//! // Back up every configured tenant
//! let thread_pool = config.build_thread_pool()?;
//! for (tenant_id, res) in config.backup_all(std::path::Path::new("/var/backups"), &thread_pool) {
//!     let (archive, _non_fatal) = res?;
//!     println!("tenant {tenant_id}: {archive:?}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backup;
