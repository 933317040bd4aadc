// SPDX-License-Identifier: GPL-3.0-only

mod sizing;
mod waves;
