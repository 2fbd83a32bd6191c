// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod beacon;
mod info;
pub mod time;

pub use beacon::*;
pub use info::*;
