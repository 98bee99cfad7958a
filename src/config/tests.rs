use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.remote.port = Some(6380);
    raw.logging.level = Some("info".to_string());

    let overrides = Overrides {
        remote_port: Some(7000),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.remote.port, 7000);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_resolve_without_any_source() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.cache.context, ExecutionContext::Server);
    assert_eq!(settings.cache.default_ttl_seconds, 3600);
    assert_eq!(settings.cache.schema_version, env!("CARGO_PKG_VERSION"));
    assert_eq!(settings.cache.compress_threshold_bytes, 10 * 1024);
    assert_eq!(settings.remote.host, "127.0.0.1");
    assert_eq!(settings.remote.port, 6379);
    assert_eq!(settings.remote.key_prefix, "gazette:");
    assert!(!settings.remote.strict);
    assert_eq!(settings.local.quota_bytes, 50 * 1024 * 1024);
    assert_eq!(settings.local.database_name, "gazette-cache");
    assert!(settings.local.structured);
    assert_eq!(settings.articles.category_index_limit, 100);
    assert_eq!(settings.articles.ranking_limit, 1000);
    assert_eq!(settings.maintenance.cadence, Duration::from_secs(300));
    assert!(matches!(settings.logging.format, LogFormat::Compact));
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = Overrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn context_override_selects_client() {
    let mut raw = RawSettings::default();
    raw.cache.context = Some("server".to_string());
    raw.apply_overrides(&Overrides {
        context: Some(ExecutionContext::Client),
        ..Default::default()
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.context, ExecutionContext::Client);
}

#[test]
fn unknown_context_is_rejected() {
    let mut raw = RawSettings::default();
    raw.cache.context = Some("edge".to_string());

    let err = Settings::from_raw(raw).expect_err("invalid context");
    assert!(matches!(err, LoadError::Invalid { key: "cache.context", .. }));
}

#[test]
fn zero_values_are_rejected() {
    let mut raw = RawSettings::default();
    raw.local.quota_bytes = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "local.quota_bytes", .. })
    ));

    let mut raw = RawSettings::default();
    raw.articles.trending_limit = Some(0);
    assert!(matches!(
        Settings::from_raw(raw),
        Err(LoadError::Invalid { key: "articles.trending_limit", .. })
    ));
}

#[test]
fn fresh_ceiling_cannot_exceed_recent_ceiling() {
    let mut raw = RawSettings::default();
    raw.articles.fresh_ceiling_seconds = Some(7200);

    let err = Settings::from_raw(raw).expect_err("inverted ceilings");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "articles.fresh_ceiling_seconds",
            ..
        }
    ));
}

#[test]
fn blank_credentials_are_dropped() {
    let mut raw = RawSettings::default();
    raw.remote.username = Some("  ".to_string());
    raw.remote.password = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert!(settings.remote.username.is_none());
    assert!(settings.remote.password.is_none());
}

#[test]
fn parse_maintain_arguments() {
    let cli = CliArgs::try_parse_from(["gazette", "maintain", "--once", "--cadence-seconds", "60"])
        .expect("parse maintain");

    match cli.command {
        Command::Maintain(args) => {
            assert!(args.once);
            assert_eq!(args.cadence_seconds, Some(60));

            let mut raw = RawSettings::default();
            raw.apply_maintain_overrides(&args);
            let settings = Settings::from_raw(raw).expect("valid settings");
            assert_eq!(settings.maintenance.cadence, Duration::from_secs(60));
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_invalidate_arguments() {
    let cli = CliArgs::try_parse_from([
        "gazette",
        "invalidate",
        "--tag",
        "author:42",
        "--tag",
        "category:science",
    ])
    .expect("parse invalidate");

    match cli.command {
        Command::Invalidate(args) => {
            assert_eq!(args.tags, vec!["author:42", "category:science"]);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn invalidate_requires_a_tag() {
    assert!(CliArgs::try_parse_from(["gazette", "invalidate"]).is_err());
}

#[test]
fn global_overrides_follow_the_subcommand() {
    let cli = CliArgs::try_parse_from([
        "gazette",
        "article",
        "breaking-news",
        "--context",
        "client",
        "--remote-strict",
        "true",
    ])
    .expect("parse article");

    assert_eq!(cli.overrides.context, Some(ExecutionContext::Client));
    assert_eq!(cli.overrides.remote_strict, Some(true));
    match cli.command {
        Command::Article(args) => assert_eq!(args.identifier, "breaking-news"),
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn parse_clear_arguments() {
    let cli = CliArgs::try_parse_from(["gazette", "clear", "--pattern", "search:"])
        .expect("parse clear");
    match cli.command {
        Command::Clear(args) => assert_eq!(args.pattern.as_deref(), Some("search:")),
        other => panic!("unexpected command: {other:?}"),
    }
}
