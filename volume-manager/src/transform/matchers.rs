// SPDX-License-Identifier: GPL-3.0-only

//! Locator expressions the transformers emit.

use volume_cel::{Expression, Result, env};
use volume_types::constants::META_PARTITION_LABEL;
use volume_types::constants::META_SIZE;

/// Matches nothing; the volume is reported missing.
pub fn no_match() -> Result<Expression> {
    Expression::parse_bool("false", env::empty())
}

pub fn system_disk_match() -> Result<Expression> {
    Expression::parse_bool("system_disk", env::disk_locator())
}

pub fn label_volume_match(label: &str) -> Result<Expression> {
    Expression::parse_bool(
        &format!("volume.partition_label == \"{label}\""),
        env::volume_locator(),
    )
}

/// Matches a labelled partition that also carries a filesystem signature.
pub fn label_volume_match_and_non_empty(label: &str) -> Result<Expression> {
    Expression::parse_bool(
        &format!("volume.partition_label == \"{label}\" && volume.name != \"\""),
        env::volume_locator(),
    )
}

pub fn meta_match() -> Result<Expression> {
    Expression::parse_bool(
        &format!(
            "volume.partition_label == \"{META_PARTITION_LABEL}\" && volume.name in [\"\", \"talosmeta\"] && volume.size == {META_SIZE}u"
        ),
        env::volume_locator(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use volume_cel::Activation;
    use volume_types::DiscoveredVolumeSpec;

    fn volume(label: &str, name: &str, size: u64) -> Activation {
        let volume = DiscoveredVolumeSpec {
            partition_label: label.into(),
            name: name.into(),
            size,
            ty: "partition".into(),
            ..Default::default()
        };
        Activation::new().bind("volume", volume.to_value())
    }

    #[test]
    fn meta_requires_exact_size_and_known_signature() {
        let meta = meta_match().unwrap();
        let env = env::volume_locator();
        assert!(meta.eval_bool(env, &volume("META", "", META_SIZE)).unwrap());
        assert!(meta.eval_bool(env, &volume("META", "talosmeta", META_SIZE)).unwrap());
        assert!(!meta.eval_bool(env, &volume("META", "xfs", META_SIZE)).unwrap());
        assert!(!meta.eval_bool(env, &volume("META", "", 2 * META_SIZE)).unwrap());
    }

    #[test]
    fn label_and_signature() {
        let expr = label_volume_match_and_non_empty("STATE").unwrap();
        assert_eq!(
            expr.text(),
            "volume.partition_label == \"STATE\" && volume.name != \"\""
        );
        let env = env::volume_locator();
        assert!(expr.eval_bool(env, &volume("STATE", "xfs", 1)).unwrap());
        assert!(!expr.eval_bool(env, &volume("STATE", "", 1)).unwrap());
    }

    #[test]
    fn no_match_is_literal_false() {
        assert_eq!(no_match().unwrap().text(), "false");
        assert_eq!(system_disk_match().unwrap().text(), "system_disk");
    }
}
