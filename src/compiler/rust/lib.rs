// Copyright © 2025 Collabora, Ltd.
// SPDX-License-Identifier: MIT

pub mod bitset;
pub mod cfg;
pub mod dataflow;
