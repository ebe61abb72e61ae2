// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Personal odd jobs toolbox.
//!
//! A grab bag of small utilities that grew out of day-to-day annoyances: Git
//! branch chores, a minimal build system, mail forwarding, a file watcher, a
//! podcast feed generator, desktop shortcut plumbing, and a few others. Each
//! tool lives in its own module and is exposed as a subcommand of the
//! `oddjobs` binary.

pub mod build;
pub mod cast;
pub mod compress;
pub mod config;
pub mod cub;
pub mod dd;
pub mod desktop;
pub mod forward;
pub mod git;
pub mod hash;
pub mod lottery;
pub mod mail;
pub mod mbox;
pub mod path;
pub mod process;
pub mod reroute;
pub mod watch;
