//! Translation of the `build` section into `gn` arguments.

use crate::config::{BuildSettings, OptimizationLevel};

/// Translate build settings into ordered `key=value` tokens.
///
/// Order is fixed: `is_optimized`, `is_debug`, then the opt-in toggles
/// (emitted only when set), then any custom flags verbatim.
pub fn translate(build: &BuildSettings) -> Vec<String> {
    let mut flags = vec![
        format!(
            "is_optimized={}",
            build.optimization_level != OptimizationLevel::O0
        ),
        format!("is_debug={}", build.is_debug),
    ];

    let toggles = [
        ("use_jumbo_build", build.use_jumbo_build),
        ("thin_lto", build.thin_lto),
        (
            "disable_google_update_check",
            build.disable_google_update_check,
        ),
    ];
    for (key, enabled) in toggles {
        if enabled {
            flags.push(format!("{key}=true"));
        }
    }

    if let Some(custom) = build
        .custom_build_flags
        .as_deref()
        .filter(|custom| !custom.is_empty())
    {
        flags.push(custom.to_string());
    }

    flags
}

/// Join translated flags into the single `--args` value `gn` expects.
pub fn gn_args(flags: &[String]) -> String {
    flags.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(level: OptimizationLevel, on: bool, custom: Option<&str>) -> BuildSettings {
        BuildSettings {
            optimization_level: level,
            is_debug: on,
            use_jumbo_build: on,
            thin_lto: on,
            disable_google_update_check: on,
            custom_build_flags: custom.map(str::to_string),
            ..BuildSettings::default()
        }
    }

    #[test]
    fn all_off_emits_only_mandatory_flags() {
        let flags = translate(&settings(OptimizationLevel::O0, false, None));
        assert_eq!(flags, vec!["is_optimized=false", "is_debug=false"]);
    }

    #[test]
    fn all_on_preserves_order_and_appends_custom_flags_last() {
        let flags = translate(&settings(OptimizationLevel::O2, true, Some("foo=bar")));
        assert_eq!(
            flags,
            vec![
                "is_optimized=true",
                "is_debug=true",
                "use_jumbo_build=true",
                "thin_lto=true",
                "disable_google_update_check=true",
                "foo=bar",
            ]
        );
    }

    #[test]
    fn empty_custom_flags_are_dropped() {
        let flags = translate(&settings(OptimizationLevel::O1, false, Some("")));
        assert_eq!(flags, vec!["is_optimized=true", "is_debug=false"]);
    }

    #[test]
    fn whitespace_custom_flags_are_kept_verbatim() {
        let flags = translate(&settings(OptimizationLevel::O1, false, Some("  ")));
        assert_eq!(flags, vec!["is_optimized=true", "is_debug=false", "  "]);
    }

    #[test]
    fn default_build_settings_translate_to_release_args() {
        let flags = translate(&BuildSettings::default());
        assert_eq!(
            gn_args(&flags),
            "is_optimized=true is_debug=false use_jumbo_build=true thin_lto=true \
             disable_google_update_check=true"
        );
    }
}
