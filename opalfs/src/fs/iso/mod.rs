// SPDX-License-Identifier: MIT

pub mod constant;
pub mod types;

pub mod meta;
pub mod node;
pub mod utils;

pub mod layout;
pub mod parser;
pub mod writer;

pub mod hybrid;

pub mod facade;
pub mod image;

pub mod prelude {
    pub use super::constant::*;
    pub use super::facade::*;
    pub use super::image::*;
    pub use super::meta::*;
    pub use super::node::{NodeId, PayloadId};
    pub use super::types::*;
}
