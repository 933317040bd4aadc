// SPDX-License-Identifier: GPL-3.0-only

mod keys;
mod luks;
