// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios driven through `Supervisor::receive` with the
//! scripted fake driver — no processes, sockets, or clusters involved.

mod specs;
