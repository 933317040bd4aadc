// SPDX-License-Identifier: GPL-3.0-only

mod boot;
mod teardown;
