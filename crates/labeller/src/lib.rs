/*
 * 5D Labs Agent Platform - Ownership Labeller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Ownership labeller library
//!
//! Stamps the `olm.managed=true` marker onto objects owned by the operator
//! lifecycle manager, and reports when every watched kind carries it so the
//! process can restart with label-filtered watches.

pub mod completion;
pub mod config;
pub mod controller;
pub mod error;
pub mod labeller;
pub mod ownership;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types
pub use completion::{CompletionArbiter, CompletionTracker};
pub use config::{LabellerConfig, LabelledKind};
pub use controller::{run_labellers, RunOutcome};
pub use error::{LabellerError, Result};
pub use labeller::{Labeller, Outcome, SyncHandler};
pub use ownership::{has_component_label, has_owner_ref, is_marked};
