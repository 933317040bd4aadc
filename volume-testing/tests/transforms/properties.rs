// SPDX-License-Identifier: GPL-3.0-only

use std::collections::{BTreeMap, BTreeSet};

use volume_config::Config;
use volume_manager::transform::parents;
use volume_manager::{TransformContext, render};
use volume_types::constants::PARTITION_LABEL_LENGTH;

use crate::common::{machine_with, user_volume};

fn every_kind(name: &str) -> String {
    let documents = [
        user_volume(name, "2GiB"),
        format!(
            "apiVersion: v1alpha1\nkind: RawVolumeConfig\nname: {name}\nprovisioning:\n  diskSelector:\n    match: \"!system_disk\"\n  minSize: 1GiB\n"
        ),
        format!(
            "apiVersion: v1alpha1\nkind: SwapVolumeConfig\nname: {name}\nprovisioning:\n  diskSelector:\n    match: \"!system_disk\"\n  minSize: 1GiB\n"
        ),
    ];
    machine_with(&documents.join("---\n"))
}

#[test]
fn rendering_is_deterministic() {
    let config = Config::parse(&every_kind("data")).unwrap();
    let ctx = TransformContext::default();

    let encode = |ctx: &TransformContext| -> Vec<String> {
        render(&config, ctx)
            .unwrap()
            .configs
            .iter()
            .map(|c| c.to_yaml().unwrap())
            .collect()
    };
    assert_eq!(encode(&ctx), encode(&ctx));
}

#[test]
fn ids_are_unique_across_kinds() {
    let config = Config::parse(&every_kind("data")).unwrap();
    config.validate_strict(false).unwrap();
    let desired = render(&config, &TransformContext::default()).unwrap();

    let ids: BTreeSet<&str> = desired.configs.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids.len(), desired.configs.len());
    for id in ["u-data", "r-data", "s-data"] {
        assert!(ids.contains(id), "{id} missing");
    }
}

#[test]
fn names_are_bounded() {
    let longest = "n".repeat(34);
    let config = Config::parse(&every_kind(&longest)).unwrap();
    config.validate_strict(false).unwrap();

    let desired = render(&config, &TransformContext::default()).unwrap();
    for volume in &desired.configs {
        assert!(volume.spec.provisioning.partition_spec.label.len() <= PARTITION_LABEL_LENGTH);
    }

    let too_long = Config::parse(&every_kind(&"n".repeat(35))).unwrap();
    assert!(too_long.validate_strict(false).is_err());
}

#[test]
fn parents_form_a_forest() {
    let config = Config::parse(&machine_with(&user_volume("data", "2GiB"))).unwrap();
    let desired = render(&config, &TransformContext::default()).unwrap();
    let by_id: BTreeMap<&str, _> = desired.configs.iter().map(|c| (c.id.as_str(), c)).collect();

    // Every chain of parents ends at the root without revisiting a volume.
    fn walk<'a>(
        id: &'a str,
        by_id: &BTreeMap<&'a str, &'a volume_types::VolumeConfig>,
        path: &mut Vec<&'a str>,
    ) {
        assert!(!path.contains(&id), "cycle through {id}: {path:?}");
        let volume = by_id
            .get(id)
            .unwrap_or_else(|| panic!("{id} is not declared"));
        path.push(id);
        for parent in parents(volume) {
            walk(parent, by_id, path);
        }
        path.pop();
    }

    for volume in &desired.configs {
        walk(&volume.id, &by_id, &mut Vec::new());
    }
    assert!(by_id.contains_key("u-data"));
}
