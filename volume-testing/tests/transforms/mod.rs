// SPDX-License-Identifier: GPL-3.0-only

mod properties;
mod scenarios;
