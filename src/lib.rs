// SPDX-FileCopyrightText: 2025 Alexandre Gomes Gaigalas <alganet@gmail.com>
//
// SPDX-License-Identifier: ISC

//! Local HTTP interception proxy with a plugin pipeline.
//!
//! Watched requests pass through plugin hooks that can observe, mock, delay,
//! or fail them. A recording session collects the resulting log entries and,
//! when stopped, lets plugins such as the minimal-permissions analysis turn
//! them into reports.

pub mod capture;
pub mod config;
pub mod error;
pub mod exchange;
pub mod path_template;
pub mod permissions;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod proxy;
pub mod recording;
pub mod report;
pub mod request_log;
pub mod serde_helpers;
pub mod state;
pub mod token;
pub mod watch;

#[cfg(test)]
mod test_helpers;
