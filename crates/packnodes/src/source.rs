use async_trait::async_trait;
use packcore::archive::archive_name;
use packcore::payload::{PackFiles, PackHandle};
use packcore::{NodeContext, NodeError, NodeExecutor, NodeKind, NodeOutput, Payload};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct PackFilesConfig {
    #[serde(default)]
    files: Vec<String>,
}

/// Reads a fixed list of archives
pub struct PackFilesNode;

#[async_trait]
impl NodeExecutor for PackFilesNode {
    fn kind(&self) -> NodeKind {
        NodeKind::PackFiles
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let config: PackFilesConfig = ctx.config()?;
        load_packs(&ctx, &config.files).await
    }

    fn validate_config(&self, config: &serde_json::Value) -> Result<(), NodeError> {
        let config: PackFilesConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::MalformedConfiguration(e.to_string()))?;
        if config.files.is_empty() {
            return Err(NodeError::MalformedConfiguration("no archives selected".to_string()));
        }
        Ok(())
    }

    fn description(&self) -> &str {
        "Loads the selected pack archives"
    }
}

/// Reads every archive the run marks as enabled
pub struct AllEnabledModsNode;

#[async_trait]
impl NodeExecutor for AllEnabledModsNode {
    fn kind(&self) -> NodeKind {
        NodeKind::AllEnabledMods
    }

    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        let files = ctx.options.enabled_mods.clone();
        if files.is_empty() {
            return Err(NodeError::MalformedConfiguration(
                "no mods are enabled for this run".to_string(),
            ));
        }
        load_packs(&ctx, &files).await
    }

    fn description(&self) -> &str {
        "Loads every enabled mod archive"
    }
}

/// Reads `paths` one by one. Individual failures are recorded on their
/// handle; the node only fails when nothing could be read.
async fn load_packs(ctx: &NodeContext, paths: &[String]) -> Result<NodeOutput, NodeError> {
    if paths.is_empty() {
        return Err(NodeError::MalformedConfiguration("no archives selected".to_string()));
    }

    let mut packs = Vec::with_capacity(paths.len());
    for (i, path) in paths.iter().enumerate() {
        ctx.check_cancelled()?;
        let handle = match ctx.services.archives.read_archive(path).await {
            Ok(archive) => {
                tracing::debug!("Loaded {} ({} entries)", path, archive.entries.len());
                PackHandle {
                    name: archive_name(path).to_string(),
                    path: path.clone(),
                    loaded: true,
                    reason: None,
                    archive: Some(Arc::new(archive)),
                }
            }
            Err(e) => {
                ctx.events.warn(format!("Could not load {}: {}", path, e));
                PackHandle {
                    name: archive_name(path).to_string(),
                    path: path.clone(),
                    loaded: false,
                    reason: Some(e.to_string()),
                    archive: None,
                }
            }
        };
        packs.push(handle);
        ctx.events.info(format!("Processed {} ({}/{})", path, i + 1, paths.len()));
    }

    let loaded = packs.iter().filter(|p| p.loaded).count();
    if loaded == 0 {
        let reasons: Vec<String> = packs
            .iter()
            .map(|p| format!("{}: {}", p.path, p.reason.as_deref().unwrap_or("unknown")))
            .collect();
        return Err(NodeError::IoFailure(format!(
            "none of the archives could be read ({})",
            reasons.join("; ")
        )));
    }

    let failed = packs.len() - loaded;
    Ok(NodeOutput::with_primary(Payload::PackFiles(PackFiles { packs }))
        .with_metadata("loaded", loaded)
        .with_metadata("failed", failed))
}
