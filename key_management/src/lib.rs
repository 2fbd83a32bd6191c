// Copyright 2019-2022 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub mod bytes;
pub mod ecies;
mod errors;
mod group;
mod keys;
pub mod poly;
pub mod scheme;
mod store;

pub use errors::Error;
pub use group::{minimum_threshold, DistPublic, Group, Node};
pub use keys::{Identity, Pair, Share};
pub use store::FileStore;
