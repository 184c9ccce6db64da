//! offload - elementwise kernel offload with dispatch timing
//!
//! Runs an embarrassingly parallel kernel over large arrays on a GPU (or a
//! CPU adapter when no GPU exists) and measures how long the dispatch takes.
//!
//! # Quick Start
//!
//! ```no_run
//! use offload::prelude::*;
//!
//! let config = Config::builder().elements(1 << 20).build()?;
//! let pipeline = Pipeline::new(&config)?;
//!
//! let a = vec![1i32; config.elements];
//! let b = vec![2i32; config.elements];
//! let report = pipeline.run(&a, &b)?;
//!
//! assert!(report.output.iter().all(|&v| v == 3));
//! println!("Kernel Execution Time: {}", report.elapsed);
//! # Ok::<(), offload::Error>(())
//! ```
//!
//! # Stages
//!
//! - **Device selection**: first platform, accelerator first, CPU fallback
//! - **Execution context**: one logical device and one command queue
//! - **Program build**: WGSL source compiled with its full diagnostic log
//! - **Buffers**: blocking uploads and downloads, released on drop
//! - **Dispatch**: atomic argument binding, 1-D or N-D work domains
//! - **Timing**: wall clock from enqueue to completion

#![warn(missing_debug_implementations)]

pub mod config;
pub mod error;
pub mod gpu;
pub mod host;
pub mod pipeline;
pub mod prelude;
pub mod telemetry;
pub mod timing;

pub use config::{Config, ConfigBuilder};
pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunReport};
