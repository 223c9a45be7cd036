// SPDX-License-Identifier: MPL-2.0

mod client;
mod remote;
pub mod views;

pub use client::{HangarClient, Session};
pub use remote::{ClientError, Remote};
