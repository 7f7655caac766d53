use std::collections::HashMap as StdHashMap;

use super::*;
use crate::config::{PrefixSelection, ServerDescriptor};

fn selection(tools: Option<Vec<&str>>, prefix: PrefixSelection) -> ProfileSelection {
    ProfileSelection {
        tools: tools.map(|t| t.into_iter().map(str::to_string).collect()),
        prompts: None,
        prefix,
    }
}

fn selection_full(
    tools: Option<Vec<&str>>,
    prompts: Option<Vec<&str>>,
    prefix: PrefixSelection,
) -> ProfileSelection {
    ProfileSelection {
        tools: tools.map(|t| t.into_iter().map(str::to_string).collect()),
        prompts: prompts.map(|p| p.into_iter().map(str::to_string).collect()),
        prefix,
    }
}

fn config_with_profiles(profiles: Vec<(&str, Vec<(&str, ProfileSelection)>)>) -> GatewayConfig {
    GatewayConfig {
        listen: "127.0.0.1:0".to_string(),
        mcp_servers: Vec::new(),
        profiles: profiles
            .into_iter()
            .map(|(name, entries)| {
                (
                    name.to_string(),
                    entries
                        .into_iter()
                        .map(|(entry, sel)| (entry.to_string(), sel))
                        .collect(),
                )
            })
            .collect(),
    }
}

/// Writes a mock MCP server that lists `tools` and `prompts` by name and
/// echoes `pong` for any tool call or prompt fetch, the same shell-script
/// fixture idiom `connector.rs`'s and `profile.rs`'s tests use.
fn write_listing_script(dir: &std::path::Path, tools: &[&str], prompts: &[&str]) -> anyhow::Result<std::path::PathBuf> {
    let tools_json: Vec<String> = tools
        .iter()
        .map(|name| {
            format!(
                r#"{{"name":"{name}","description":"{name}","inputSchema":{{"type":"object","properties":{{}}}}}}"#
            )
        })
        .collect();
    let prompts_json: Vec<String> = prompts
        .iter()
        .map(|name| format!(r#"{{"name":"{name}"}}"#))
        .collect();

    let path = dir.join("mock-mcp.sh");
    std::fs::write(
        &path,
        format!(
            r#"#!/bin/sh
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id"[ ]*:[ ]*\([^,}}]*\).*/\1/p')
  case "$line" in
    *\"initialize\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"protocolVersion":"2024-11-05","capabilities":{{"tools":{{}},"prompts":{{}}}},"serverInfo":{{"name":"mock","version":"0.1.0"}}}}}}\n' "$id"
      ;;
    *\"notifications/initialized\"*)
      ;;
    *\"tools/list\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"tools":[{tools}]}}}}\n' "$id"
      ;;
    *\"prompts/list\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"prompts":[{prompts}]}}}}\n' "$id"
      ;;
    *\"tools/call\"*)
      printf '{{"jsonrpc":"2.0","id":%s,"result":{{"content":[{{"type":"text","text":"pong"}}]}}}}\n' "$id"
      ;;
  esac
done
"#,
            tools = tools_json.join(","),
            prompts = prompts_json.join(","),
        ),
    )?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms)?;
    }
    Ok(path)
}

fn stdio_descriptor(script: &std::path::Path) -> ServerDescriptor {
    ServerDescriptor::Stdio {
        command: "sh".to_string(),
        args: vec![script.to_string_lossy().into_owned()],
        env: StdHashMap::new(),
    }
}

fn tool_names(resolved: &ResolvedProfile) -> Vec<String> {
    resolved.tools.iter().map(|(name, _)| name.clone()).collect()
}

fn prompt_names(resolved: &ResolvedProfile) -> Vec<String> {
    resolved.prompts.iter().map(|(name, _)| name.clone()).collect()
}

#[tokio::test]
async fn detects_two_profile_cycle() {
    let config = config_with_profiles(vec![
        (
            "loopA",
            vec![("loopB", selection(None, PrefixSelection::Absent))],
        ),
        (
            "loopB",
            vec![("loopA", selection(None, PrefixSelection::Absent))],
        ),
    ]);
    let registry = ConnectorRegistry::new(Vec::new());
    let mut resolver = ProfileResolver::new(&config, &registry);

    let error = resolver.resolve("loopA").await.unwrap_err();
    assert!(
        error.to_string().contains("loopA -> loopB -> loopA"),
        "unexpected message: {error}"
    );
}

#[tokio::test]
async fn unknown_profile_is_invalid_request() {
    let config = config_with_profiles(Vec::new());
    let registry = ConnectorRegistry::new(Vec::new());
    let mut resolver = ProfileResolver::new(&config, &registry);
    assert!(resolver.resolve("ghost").await.is_err());
}

#[tokio::test]
async fn missing_server_entry_fails_with_unknown_message() {
    let config = config_with_profiles(vec![(
        "default",
        vec![("ghost-server", selection(None, PrefixSelection::Absent))],
    )]);
    let registry = ConnectorRegistry::new(Vec::new());
    let mut resolver = ProfileResolver::new(&config, &registry);

    let error = resolver.resolve("default").await.unwrap_err();
    assert!(error.to_string().contains("ghost-server"));
}

#[tokio::test]
async fn server_init_failure_degrades_to_empty_profile() {
    let config = config_with_profiles(vec![(
        "default",
        vec![("alpha", selection(None, PrefixSelection::Absent))],
    )]);
    let registry = ConnectorRegistry::new(vec![(
        "alpha".to_string(),
        ServerDescriptor::Stdio {
            command: "/no/such/executable-xyz".to_string(),
            args: Vec::new(),
            env: StdHashMap::new(),
        },
    )]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await.expect("resolves");
    assert!(resolved.tools.is_empty());
    assert!(resolved.prompts.is_empty());
}

/// A server entry with no explicit prefix gets `<server-id>__`, and an
/// allow-list restricts exports to the named upstream tools/prompts.
#[tokio::test]
async fn scenario_a_default_prefix_and_allow_list() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script = write_listing_script(temp.path(), &["time", "date"], &["timezone", "format"])?;

    let config = config_with_profiles(vec![(
        "default",
        vec![(
            "alpha",
            selection_full(Some(vec!["time"]), Some(vec!["timezone"]), PrefixSelection::Absent),
        )],
    )]);
    let registry = ConnectorRegistry::new(vec![("alpha".to_string(), stdio_descriptor(&script))]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await?;
    assert_eq!(tool_names(&resolved), vec!["alpha__time".to_string()]);
    assert_eq!(prompt_names(&resolved), vec!["alpha__timezone".to_string()]);

    registry.dispose_all().await?;
    Ok(())
}

/// `prefix: false` on a server entry exports upstream tool names unchanged.
#[tokio::test]
async fn scenario_b_explicit_empty_prefix() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script = write_listing_script(temp.path(), &["search", "summarize"], &[])?;

    let config = config_with_profiles(vec![(
        "default",
        vec![("alpha", selection(None, PrefixSelection::Empty))],
    )]);
    let registry = ConnectorRegistry::new(vec![("alpha".to_string(), stdio_descriptor(&script))]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await?;
    assert_eq!(
        tool_names(&resolved),
        vec!["search".to_string(), "summarize".to_string()]
    );

    registry.dispose_all().await?;
    Ok(())
}

/// A nested profile's allow-list is matched against its own already-exported
/// names, not the upstream's original name, before the outer prefix applies.
#[tokio::test]
async fn scenario_c_nested_profile_prefix_and_allow_list() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script = write_listing_script(temp.path(), &["search", "summarize"], &[])?;

    let config = config_with_profiles(vec![
        ("base", vec![("alpha", selection(None, PrefixSelection::Absent))]),
        (
            "nested",
            vec![(
                "base",
                selection(Some(vec!["alpha__search"]), PrefixSelection::Explicit("nested__".to_string())),
            )],
        ),
    ]);
    let registry = ConnectorRegistry::new(vec![("alpha".to_string(), stdio_descriptor(&script))]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("nested").await?;
    assert_eq!(tool_names(&resolved), vec!["nested__alpha__search".to_string()]);

    registry.dispose_all().await?;
    Ok(())
}

/// Prefixes stack across two levels of profile nesting.
#[tokio::test]
async fn scenario_d_two_level_prefix_stacking() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script = write_listing_script(temp.path(), &["list_commits"], &[])?;

    let config = config_with_profiles(vec![
        (
            "github-readonly",
            vec![(
                "github",
                selection(Some(vec!["list_commits"]), PrefixSelection::Explicit("github__".to_string())),
            )],
        ),
        (
            "default",
            vec![(
                "github-readonly",
                selection(
                    Some(vec!["github__list_commits"]),
                    PrefixSelection::Explicit("gh__".to_string()),
                ),
            )],
        ),
    ]);
    let registry = ConnectorRegistry::new(vec![("github".to_string(), stdio_descriptor(&script))]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await?;
    assert_eq!(tool_names(&resolved), vec!["gh__github__list_commits".to_string()]);

    registry.dispose_all().await?;
    Ok(())
}

/// Empty allow-list exports nothing from that source, vs. omitted allow-list
/// which exports everything.
#[tokio::test]
async fn empty_allow_list_exports_nothing() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script = write_listing_script(temp.path(), &["search", "summarize"], &[])?;

    let config = config_with_profiles(vec![(
        "default",
        vec![("alpha", selection(Some(vec![]), PrefixSelection::Absent))],
    )]);
    let registry = ConnectorRegistry::new(vec![("alpha".to_string(), stdio_descriptor(&script))]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await?;
    assert!(resolved.tools.is_empty());

    registry.dispose_all().await?;
    Ok(())
}

/// First-wins: a profile listing its own entry before a nested profile keeps
/// its own contribution when names collide after prefixing.
#[tokio::test]
async fn first_wins_on_name_collision() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let script_a = write_listing_script(temp.path(), &["search"], &[])?;
    let script_b = {
        let dir = tempfile::tempdir()?;
        write_listing_script(dir.path(), &["search"], &[])?
    };

    let config = config_with_profiles(vec![(
        "default",
        vec![
            ("alpha", selection(None, PrefixSelection::Empty)),
            ("beta", selection(None, PrefixSelection::Empty)),
        ],
    )]);
    let registry = ConnectorRegistry::new(vec![
        ("alpha".to_string(), stdio_descriptor(&script_a)),
        ("beta".to_string(), stdio_descriptor(&script_b)),
    ]);
    let mut resolver = ProfileResolver::new(&config, &registry);

    let resolved = resolver.resolve("default").await?;
    assert_eq!(tool_names(&resolved), vec!["search".to_string()]);
    assert_eq!(resolved.tool("search").unwrap().connector_id, "alpha");

    registry.dispose_all().await?;
    Ok(())
}
