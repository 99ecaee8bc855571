//! # `ResNet` Prefabs
//!
//! Named model variants, looked up by name from [`RESNET_PREFABS`].
//! Each entry builds a [`ResNetAbstractConfig`] for a requested number of
//! classes, at the default ``224x224`` input resolution.

use crate::errors::ConfigError;
use crate::models::resnet::{ResNetAbstractConfig, ResNetConfig};

/// The default number of classes of the prefabs.
pub const PREFAB_NUM_CLASSES: usize = 1000;

/// A well-known `ResNet` variant.
#[derive(Clone, Copy)]
pub struct ResNetPreFab {
    /// The lookup name.
    pub name: &'static str,

    /// A human-readable description.
    pub description: &'static str,

    /// Builds the config for a number of classes.
    pub builder: fn(usize) -> ResNetAbstractConfig,
}

impl std::fmt::Debug for ResNetPreFab {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // `{:#?}` includes the default config.
        let pretty = f.alternate();
        let mut handle = f.debug_struct("ResNetPreFab");
        handle
            .field("name", &self.name)
            .field("description", &self.description);
        if pretty {
            handle.field("config", &self.default_config());
        }
        handle.finish()
    }
}

impl ResNetPreFab {
    /// Build the config for `num_classes` classes.
    pub fn config(
        &self,
        num_classes: usize,
    ) -> ResNetAbstractConfig {
        (self.builder)(num_classes)
    }

    /// Build the config with [`PREFAB_NUM_CLASSES`] classes.
    pub fn default_config(&self) -> ResNetAbstractConfig {
        self.config(PREFAB_NUM_CLASSES)
    }

    /// Lower the config for `num_classes` classes.
    ///
    /// # Errors
    ///
    /// See [`ResNetAbstractConfig::try_to_structure`].
    pub fn structure(
        &self,
        num_classes: usize,
    ) -> Result<ResNetConfig, ConfigError> {
        self.config(num_classes).try_to_structure()
    }
}

/// Well-known `ResNet` configs.
pub static RESNET_PREFABS: [ResNetPreFab; 7] = [
    ResNetPreFab {
        name: "resnet18",
        description: "ResNet-18, basic blocks",
        builder: ResNetAbstractConfig::resnet18,
    },
    ResNetPreFab {
        name: "resnet34",
        description: "ResNet-34, basic blocks",
        builder: ResNetAbstractConfig::resnet34,
    },
    ResNetPreFab {
        name: "resnet50",
        description: "ResNet-50, bottleneck blocks",
        builder: ResNetAbstractConfig::resnet50,
    },
    ResNetPreFab {
        name: "resnet101",
        description: "ResNet-101, bottleneck blocks",
        builder: ResNetAbstractConfig::resnet101,
    },
    ResNetPreFab {
        name: "resnext50_32x4d",
        description: "ResNeXt-50, 32 groups of width 4",
        builder: ResNetAbstractConfig::resnext50_32x4d,
    },
    ResNetPreFab {
        name: "se_resnet50",
        description: "ResNet-50, squeeze-gated bottleneck blocks",
        builder: ResNetAbstractConfig::se_resnet50,
    },
    ResNetPreFab {
        name: "aa_resnet50",
        description: "ResNet-50, attention-augmented convs in the last two stacks",
        builder: ResNetAbstractConfig::aa_resnet50,
    },
];

/// The names of the registered prefabs.
pub fn prefab_names() -> Vec<&'static str> {
    RESNET_PREFABS.iter().map(|prefab| prefab.name).collect()
}

/// Look up a prefab by name.
///
/// # Errors
///
/// [`ConfigError::UnknownPrefab`] if no prefab has the name.
pub fn lookup_prefab(name: &str) -> Result<&'static ResNetPreFab, ConfigError> {
    RESNET_PREFABS
        .iter()
        .find(|prefab| prefab.name == name)
        .ok_or_else(|| ConfigError::UnknownPrefab(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::resnet::ResNetMeta;
    use crate::models::resnet::residual_block::BlockKind;

    #[test]
    fn test_prefab_names() {
        assert_eq!(
            prefab_names(),
            vec![
                "resnet18",
                "resnet34",
                "resnet50",
                "resnet101",
                "resnext50_32x4d",
                "se_resnet50",
                "aa_resnet50"
            ]
        );
    }

    #[test]
    fn test_every_prefab_lowers() {
        for prefab in &RESNET_PREFABS {
            let config = prefab.default_config();
            assert_eq!(config.num_classes, PREFAB_NUM_CLASSES);

            let structure = prefab.structure(10).unwrap();
            assert_eq!(structure.num_classes(), 10);
            assert_eq!(structure.feature_resolution([224, 224]), [7, 7]);
        }
    }

    #[test]
    fn test_lookup_prefab() {
        let prefab = lookup_prefab("aa_resnet50").unwrap();
        assert_eq!(prefab.name, "aa_resnet50");
        assert_eq!(prefab.config(10).block, BlockKind::AttnBottleneck);
        assert_eq!(prefab.structure(10).unwrap().feature_planes(), 2048);

        assert_eq!(
            lookup_prefab("resnet9000").unwrap_err(),
            ConfigError::UnknownPrefab("resnet9000".to_string())
        );
    }

    #[test]
    fn test_prefab_debug() {
        let prefab = lookup_prefab("resnet18").unwrap();
        assert_eq!(
            format!("{prefab:?}"),
            "ResNetPreFab { name: \"resnet18\", description: \"ResNet-18, basic blocks\" }"
        );

        let pretty = format!("{prefab:#?}");
        assert!(pretty.contains("config: ResNetAbstractConfig {"));
        assert!(pretty.contains("num_classes: 1000"));
    }
}
