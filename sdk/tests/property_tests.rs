use proptest::prelude::*;
use sdk::errors::{KernelError, KernelErrorExt};

// Error hints must stay static and payload-free: whatever flows into an
// error variant, the hint never echoes it back to the caller.
proptest! {
    #[test]
    fn test_error_user_hint_completeness(payload in "\\PC{1,60}") {
        let errs = vec![
            KernelError::UnresolvedTool(payload.clone()),
            KernelError::CyclicChain(payload.clone()),
            KernelError::InvalidParams(payload.clone()),
            KernelError::PrimitiveFailure(payload.clone()),
            KernelError::Keyring(payload.clone()),
            KernelError::Config(payload.clone()),
        ];

        for err in errs {
            let hint = err.user_hint();
            prop_assert!(!hint.is_empty());
            prop_assert!(!err.kind().is_empty());
            // Hints are static strings; the payload must not leak through
            if payload.len() > 8 {
                prop_assert!(!hint.contains(&payload));
            }
        }
    }
}

// Manifest serialization round-trips for syntactically valid inputs.
proptest! {
    #[test]
    fn test_manifest_roundtrip(
        tool_id in "[a-z][a-z0-9_]{0,20}",
        version in "[0-9]{1,3}\\.[0-9]{1,3}\\.[0-9]{1,3}",
        category in "[a-z]{1,12}",
        executor in proptest::option::of("[a-z][a-z0-9_]{0,20}"),
        scope in proptest::option::of("[a-z]+:[a-z]+"),
    ) {
        use sdk::manifest::{ConfigSchema, ToolManifest, ToolType};

        let manifest = ToolManifest {
            tool_id,
            version,
            tool_type: ToolType::User,
            executor_id: executor,
            category,
            config: serde_json::Map::new(),
            config_schema: ConfigSchema::default(),
            env_config: None,
            required_scope: scope,
        };

        let json = serde_json::to_string(&manifest).unwrap();
        let parsed: ToolManifest = serde_json::from_str(&json).unwrap();

        prop_assert_eq!(manifest.tool_id, parsed.tool_id);
        prop_assert_eq!(manifest.version, parsed.version);
        prop_assert_eq!(manifest.executor_id, parsed.executor_id);
        prop_assert_eq!(manifest.required_scope, parsed.required_scope);
    }
}

// Declared semver versions always parse back to what was declared.
proptest! {
    #[test]
    fn test_version_parses(major in 0u64..1000, minor in 0u64..1000, patch in 0u64..1000) {
        use sdk::manifest::{ConfigSchema, ToolManifest, ToolType};

        let manifest = ToolManifest {
            tool_id: "t".to_string(),
            version: format!("{major}.{minor}.{patch}"),
            tool_type: ToolType::Primitive,
            executor_id: None,
            category: "general".to_string(),
            config: serde_json::Map::new(),
            config_schema: ConfigSchema::default(),
            env_config: None,
            required_scope: None,
        };

        let parsed = manifest.parsed_version().unwrap();
        prop_assert_eq!(parsed, semver::Version::new(major, minor, patch));
    }
}

// A schema never accepts params it does not declare, and never rejects a
// complete, well-typed set.
proptest! {
    #[test]
    fn test_schema_validation(
        declared in "[a-z]{1,10}",
        undeclared in "[A-Z]{1,10}",
        value in "\\PC{0,20}",
    ) {
        use sdk::manifest::{ConfigSchema, ParamSpec, ParamType};

        let mut params = std::collections::BTreeMap::new();
        params.insert(
            declared.clone(),
            ParamSpec {
                param_type: ParamType::String,
                required: true,
                default: None,
                description: None,
            },
        );
        let schema = ConfigSchema { params };

        let mut good = serde_json::Map::new();
        good.insert(declared.clone(), serde_json::Value::String(value));
        prop_assert!(schema.validate(&good).is_ok());

        let mut unknown = good.clone();
        unknown.insert(undeclared, serde_json::Value::Bool(true));
        prop_assert!(schema.validate(&unknown).is_err());

        let empty = serde_json::Map::new();
        prop_assert!(schema.validate(&empty).is_err());
    }
}
