// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error;

#[derive(Debug, Error)]
#[error("authentication failure")]
pub struct AuthenticationFailure;
