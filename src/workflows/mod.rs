// Copyright 2025 Cowboy AI, LLC.

//! Concrete workflows driven by the generic engine

pub mod citizenship;
