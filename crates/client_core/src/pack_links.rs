//! Server-owner snippets derived from a pack record: download URL,
//! `server.properties` lines and ForcePack plugin configuration.

use std::fmt::{self, Write as _};

use shared::protocol::ResourcePackRecord;
use thiserror::Error;
use tracing::warn;

const PACK_PROMPT: &str = "Please accept the resource pack to continue";

/// `(action, kick, message)` in the order the plugin documents them.
const FORCEPACK_ACTIONS: &[(&str, bool, Option<&str>)] = &[
    ("ACCEPTED", false, None),
    (
        "DECLINED",
        true,
        Some("Resource pack is required to play on this server"),
    ),
    ("FAILED_DOWNLOAD", true, Some("Failed to download resource pack")),
    ("FAILED_RELOAD", true, Some("Failed to reload resource pack")),
    ("SUCCESSFUL", false, None),
];

pub fn download_url(base_url: &str, storage_filename: &str) -> String {
    format!(
        "{}/uploads/{}",
        base_url.trim_end_matches('/'),
        storage_filename
    )
}

pub fn pack_download_url(base_url: &str, pack: &ResourcePackRecord) -> String {
    download_url(base_url, &pack.storage_filename)
}

/// The two `server.properties` lines that make a vanilla server push the pack.
pub fn server_properties_snippet(download_url: &str, sha1: Option<&str>) -> String {
    format!(
        "resource-pack={download_url}\nresource-pack-sha1={}",
        sha1.unwrap_or_default()
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForcePackMode {
    Global,
    Server { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForcePackError {
    #[error("a server name is required for per-server configuration")]
    MissingServerName,
    #[error("server name '{0}' may only contain letters, digits, '-' and '_'")]
    InvalidServerName(String),
    #[error("failed to render configuration")]
    Render(#[from] fmt::Error),
}

fn toml_string(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn push_actions(out: &mut String, table: &str, indent: &str) -> fmt::Result {
    writeln!(out, "{indent}[{table}.actions]")?;
    for (action, kick, message) in FORCEPACK_ACTIONS {
        writeln!(out, "{indent}    [{table}.actions.{action}]")?;
        writeln!(out, "{indent}        kick = {kick}")?;
        if let Some(message) = message {
            writeln!(out, "{indent}        message = {}", toml_string(message))?;
        }
        writeln!(out, "{indent}        commands = []")?;
    }
    Ok(())
}

/// Renders a ForcePack configuration for `pack`.
///
/// Per-server mode adds one version override per converted pack that reports
/// its pack format; conversions without one are skipped.
pub fn forcepack_config(
    base_url: &str,
    pack: &ResourcePackRecord,
    conversions: &[ResourcePackRecord],
    mode: &ForcePackMode,
) -> Result<String, ForcePackError> {
    let url = toml_string(&pack_download_url(base_url, pack));
    let hash = toml_string(pack.file_hash.as_deref().unwrap_or_default());
    let prompt = toml_string(PACK_PROMPT);
    let mut out = String::new();

    match mode {
        ForcePackMode::Global => {
            writeln!(out, "[global-pack]")?;
            writeln!(out, "enable = true")?;
            writeln!(out, "url = {url}")?;
            writeln!(out, "hash = {hash}")?;
            writeln!(out, "generate-hash = false")?;
            writeln!(out, "resourcepack.prompt = {prompt}")?;
            writeln!(out, "exclude = []")?;
            out.push('\n');
            push_actions(&mut out, "global-pack", "")?;
        }
        ForcePackMode::Server { name } => {
            let name = name.trim();
            if name.is_empty() {
                return Err(ForcePackError::MissingServerName);
            }
            if !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                return Err(ForcePackError::InvalidServerName(name.to_string()));
            }

            let table = format!("servers.{name}");
            writeln!(out, "[servers]")?;
            writeln!(out, "    [{table}]")?;
            writeln!(out, "        resourcepack.urls = [{url}]")?;
            writeln!(out, "        resourcepack.generate-hash = false")?;
            writeln!(out, "        resourcepack.hashes = [{hash}]")?;
            writeln!(out, "        resourcepack.prompt = {prompt}")?;
            push_actions(&mut out, &table, "        ")?;

            for converted in conversions {
                let Some(format) = converted.pack_format else {
                    warn!(
                        pack_id = converted.id.0,
                        "forcepack: skipping conversion without pack format"
                    );
                    continue;
                };
                let converted_url = toml_string(&pack_download_url(base_url, converted));
                let converted_hash =
                    toml_string(converted.file_hash.as_deref().unwrap_or_default());
                out.push('\n');
                writeln!(out, "[{table}.version.{format}]")?;
                writeln!(out, "    resourcepack.url = {converted_url}")?;
                writeln!(out, "    resourcepack.generate-hash = false")?;
                writeln!(out, "    resourcepack.hash = {converted_hash}")?;
                writeln!(out, "    resourcepack.prompt = {prompt}")?;
            }
        }
    }

    Ok(out.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use shared::{
        domain::PackId,
        protocol::{PackRef, ResourcePackRecord},
    };

    use super::*;

    fn record(id: i64, storage: &str, hash: Option<&str>) -> ResourcePackRecord {
        ResourcePackRecord {
            id: PackId(id),
            original_filename: format!("{storage}.zip"),
            storage_filename: storage.to_string(),
            size: 1024,
            upload_date: NaiveDate::from_ymd_opt(2024, 5, 1)
                .and_then(|d| d.and_hms_opt(12, 0, 0))
                .expect("date"),
            file_hash: hash.map(str::to_string),
            converted: false,
            target_version: None,
            original_pack: None,
            pack_format: None,
        }
    }

    fn converted(id: i64, storage: &str, format: Option<u32>) -> ResourcePackRecord {
        ResourcePackRecord {
            converted: true,
            target_version: Some("1.20.1".into()),
            original_pack: Some(PackRef { id: PackId(1) }),
            pack_format: format,
            ..record(id, storage, Some("cafe"))
        }
    }

    #[test]
    fn builds_download_url_and_snippet() {
        let url = download_url("https://packs.example.org/", "abc.zip");
        assert_eq!(url, "https://packs.example.org/uploads/abc.zip");
        assert_eq!(
            server_properties_snippet(&url, Some("deadbeef")),
            "resource-pack=https://packs.example.org/uploads/abc.zip\nresource-pack-sha1=deadbeef"
        );
        assert!(server_properties_snippet(&url, None).ends_with("resource-pack-sha1="));
    }

    #[test]
    fn global_config_is_valid_toml() {
        let pack = record(1, "orig.zip", Some("beef"));
        let rendered = forcepack_config("http://api", &pack, &[], &ForcePackMode::Global)
            .expect("global config");
        let parsed: toml::Value = toml::from_str(&rendered).expect("valid toml");

        let global = &parsed["global-pack"];
        assert_eq!(global["url"].as_str(), Some("http://api/uploads/orig.zip"));
        assert_eq!(global["hash"].as_str(), Some("beef"));
        assert_eq!(global["actions"]["DECLINED"]["kick"].as_bool(), Some(true));
        assert_eq!(global["actions"]["ACCEPTED"]["kick"].as_bool(), Some(false));
    }

    #[test]
    fn server_config_lists_converted_versions_by_pack_format() {
        let pack = record(1, "orig.zip", Some("beef"));
        let conversions = vec![
            converted(2, "conv-15.zip", Some(15)),
            converted(3, "conv-unknown.zip", None),
        ];
        let rendered = forcepack_config(
            "http://api",
            &pack,
            &conversions,
            &ForcePackMode::Server {
                name: "lobby".into(),
            },
        )
        .expect("server config");
        let parsed: toml::Value = toml::from_str(&rendered).expect("valid toml");

        let lobby = &parsed["servers"]["lobby"];
        assert_eq!(
            lobby["resourcepack"]["urls"][0].as_str(),
            Some("http://api/uploads/orig.zip")
        );
        assert_eq!(
            lobby["version"]["15"]["resourcepack"]["url"].as_str(),
            Some("http://api/uploads/conv-15.zip")
        );
        assert_eq!(lobby["version"].as_table().map(|t| t.len()), Some(1));
        assert!(!rendered.contains("conv-unknown.zip"));
    }

    #[test]
    fn server_mode_requires_a_usable_name() {
        let pack = record(1, "orig.zip", None);
        assert_eq!(
            forcepack_config(
                "http://api",
                &pack,
                &[],
                &ForcePackMode::Server { name: "  ".into() }
            ),
            Err(ForcePackError::MissingServerName)
        );
        assert!(matches!(
            forcepack_config(
                "http://api",
                &pack,
                &[],
                &ForcePackMode::Server {
                    name: "my server".into()
                }
            ),
            Err(ForcePackError::InvalidServerName(_))
        ));
    }

    #[test]
    fn every_action_is_rendered_in_both_modes() {
        let pack = record(1, "orig.zip", Some("beef"));
        let global = forcepack_config("http://api", &pack, &[], &ForcePackMode::Global)
            .expect("global config");
        let server = forcepack_config(
            "http://api",
            &pack,
            &[],
            &ForcePackMode::Server {
                name: "survival_1".into(),
            },
        )
        .expect("server config");

        let global: toml::Value = toml::from_str(&global).expect("valid toml");
        let server: toml::Value = toml::from_str(&server).expect("valid toml");
        for (action, kick, _) in FORCEPACK_ACTIONS {
            assert_eq!(
                global["global-pack"]["actions"][*action]["kick"].as_bool(),
                Some(*kick)
            );
            assert_eq!(
                server["servers"]["survival_1"]["actions"][*action]["kick"].as_bool(),
                Some(*kick)
            );
        }
    }
}
