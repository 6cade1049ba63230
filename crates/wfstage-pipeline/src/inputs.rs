//! Staging declared inputs into a run's `inputs/` directory.
//!
//! Every URL of every `File` leaf is fetched through the shared input cache
//! and then linked into the destination under its display name. Two inputs
//! with the same display name get distinct links: the later one is prefixed
//! with the staging counter (`2_data.txt`).

use std::path::{Path, PathBuf};

use wfstage_core::{
    FileRef, InputValue, MaterializedContent, MaterializedInput, ParamNode, ParamTree,
};

use crate::error::StageError;
use crate::fetch::RemoteCache;

/// Running count of files staged during one walk.
#[derive(Debug, Default)]
pub struct StagingCounter {
    last: usize,
}

impl StagingCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new value.
    pub fn next(&mut self) -> usize {
        self.last += 1;
        self.last
    }

    pub fn last(&self) -> usize {
        self.last
    }
}

pub struct InputMaterializer<'a> {
    cache: &'a RemoteCache,
}

impl<'a> InputMaterializer<'a> {
    pub fn new(cache: &'a RemoteCache) -> Self {
        Self { cache }
    }

    /// Stage every leaf of `tree` into `dest_dir`. Returns the flattened
    /// inputs (dotted names, declaration order) and the number of staged
    /// files, one per fetched URL.
    pub async fn materialize(
        &self,
        tree: &ParamTree,
        dest_dir: &Path,
    ) -> Result<(Vec<MaterializedInput>, usize), StageError> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let mut counter = StagingCounter::new();
        let mut inputs = Vec::new();
        self.walk(&tree.entries, "", dest_dir, &mut counter, &mut inputs)
            .await?;
        let files: usize = inputs.iter().map(|input| input.contents().count()).sum();
        tracing::info!(
            inputs = inputs.len(),
            files,
            dest = %dest_dir.display(),
            "Inputs materialized"
        );
        Ok((inputs, files))
    }

    async fn walk(
        &self,
        entries: &[(String, ParamNode)],
        prefix: &str,
        dest_dir: &Path,
        counter: &mut StagingCounter,
        inputs: &mut Vec<MaterializedInput>,
    ) -> Result<(), StageError> {
        for (key, node) in entries {
            let name = format!("{prefix}{key}");
            match node {
                ParamNode::Scalar(values) => inputs.push(MaterializedInput {
                    name,
                    values: values.iter().cloned().map(InputValue::Scalar).collect(),
                }),
                ParamNode::File(file) => {
                    let values = self.stage_file(file, dest_dir, counter).await?;
                    inputs.push(MaterializedInput { name, values });
                }
                ParamNode::Nested(children) => {
                    let nested_prefix = format!("{name}.");
                    Box::pin(self.walk(children, &nested_prefix, dest_dir, counter, inputs))
                        .await?;
                }
            }
        }
        Ok(())
    }

    async fn stage_file(
        &self,
        file: &FileRef,
        dest_dir: &Path,
        counter: &mut StagingCounter,
    ) -> Result<Vec<InputValue>, StageError> {
        let mut values = Vec::with_capacity(file.urls.len());
        for url in &file.urls {
            let cached = self
                .cache
                .fetch(url, file.security_context.as_deref())
                .await?;
            let link = free_link_path(dest_dir, &cached.display_name, counter).await?;
            place(&cached.local_path, &link).await?;
            tracing::debug!(uri = %url, link = %link.display(), "Input staged");
            values.push(InputValue::Content(MaterializedContent {
                local_path: link,
                source_uri: cached.source_uri,
                display_name: cached.display_name,
            }));
        }
        Ok(values)
    }
}

/// Claim a counter value for this file and find a name for it in
/// `dest_dir`: the display name if free, else `{n}_{name}`.
async fn free_link_path(
    dest_dir: &Path,
    display_name: &str,
    counter: &mut StagingCounter,
) -> Result<PathBuf, StageError> {
    let mut number = counter.next();
    let mut candidate = dest_dir.join(display_name);
    while occupied(&candidate).await {
        candidate = dest_dir.join(format!("{number}_{display_name}"));
        if !occupied(&candidate).await {
            break;
        }
        number = counter.next();
    }
    Ok(candidate)
}

/// Present in any form, dangling symlinks included.
async fn occupied(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

/// Relative link targets resolve from the link's directory, so the target
/// is made absolute first.
#[cfg(unix)]
async fn place(cached: &Path, link: &Path) -> std::io::Result<()> {
    let target = std::path::absolute(cached)?;
    tokio::fs::symlink(target, link).await
}

#[cfg(not(unix))]
async fn place(cached: &Path, link: &Path) -> std::io::Result<()> {
    tokio::fs::copy(cached, link).await.map(|_| ())
}
