// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

mod channel;
mod observer;
mod staging;

pub use channel::{ChannelOpener, ExecChannel, OutputLine, OutputStream};
pub use observer::{JobObserver, JobUpdate, NullObserver};
pub use staging::Staging;
