//! S3 handler set (C7): per-operation orchestration over the Store (C1),
//! namelist cache (C2), lock table (C3), and data plane helpers (C6).

pub mod bucket;
pub mod multipart;
pub mod object;
pub mod service;
