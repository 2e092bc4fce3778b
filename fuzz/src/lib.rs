//! Fuzzing harnesses for the shm-queue ring.
//!
//! These run the real queue on heap-backed regions and compare every step
//! against a `VecDeque` model.

pub mod queue_model;
