//! Descriptor registry owned by one stub server.
//!
//! Files are merged into a single `DescriptorPool`. A file is skipped when
//! its name is already registered, or when any of its top-level messages,
//! enums, services or extensions collides with a name already present, so
//! loading overlapping descriptor sets (each carrying its own copy of
//! `google/protobuf/*.proto`) never fails on duplicates.

use crate::error::Result;
use prost::Message as _;
use prost_reflect::{DescriptorPool, MethodDescriptor, ServiceDescriptor};
use prost_types::{FileDescriptorProto, FileDescriptorSet};
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    pool: DescriptorPool,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every file of an encoded `FileDescriptorSet`.
    pub fn add_file_descriptor_set(&mut self, bytes: &[u8]) -> Result<usize> {
        let set = FileDescriptorSet::decode(bytes)?;
        self.add_files(set.file)
    }

    pub fn add_file_descriptor_set_file(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let bytes = std::fs::read(path.as_ref())?;
        self.add_file_descriptor_set(&bytes)
    }

    pub fn add_pool(&mut self, pool: &DescriptorPool) -> Result<usize> {
        self.add_files(pool.file_descriptor_protos().cloned())
    }

    /// Register files in dependency order, returning how many were added.
    ///
    /// Files must arrive after their imports, as `protoc --include_imports`
    /// emits them.
    pub fn add_files(
        &mut self,
        files: impl IntoIterator<Item = FileDescriptorProto>,
    ) -> Result<usize> {
        let mut added = 0;
        for file in files {
            let name = file.name().to_string();
            if self.pool.get_file_by_name(&name).is_some() {
                debug!("Skipping already registered descriptor file {}", name);
                continue;
            }
            if let Some(conflict) = self.conflicting_name(&file) {
                debug!(
                    "Skipping descriptor file {}: '{}' is already registered",
                    name, conflict
                );
                continue;
            }
            self.pool.add_file_descriptor_proto(file)?;
            added += 1;
        }
        Ok(added)
    }

    fn conflicting_name(&self, file: &FileDescriptorProto) -> Option<String> {
        let qualify = |name: &str| {
            if file.package().is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", file.package(), name)
            }
        };

        let pool = &self.pool;
        file.message_type
            .iter()
            .map(|m| qualify(m.name()))
            .find(|name| pool.get_message_by_name(name).is_some())
            .or_else(|| {
                file.enum_type
                    .iter()
                    .map(|e| qualify(e.name()))
                    .find(|name| pool.get_enum_by_name(name).is_some())
            })
            .or_else(|| {
                file.service
                    .iter()
                    .map(|s| qualify(s.name()))
                    .find(|name| pool.get_service_by_name(name).is_some())
            })
            .or_else(|| {
                file.extension
                    .iter()
                    .map(|x| qualify(x.name()))
                    .find(|name| pool.get_extension_by_name(name).is_some())
            })
    }

    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    pub fn services(&self) -> impl Iterator<Item = ServiceDescriptor> + '_ {
        self.pool.services()
    }

    pub fn methods(&self) -> impl Iterator<Item = MethodDescriptor> + '_ {
        self.pool
            .services()
            .flat_map(|service| service.methods().collect::<Vec<_>>())
    }

    /// Every registered file, in registration order.
    pub fn file_descriptor_set(&self) -> FileDescriptorSet {
        FileDescriptorSet {
            file: self.pool.file_descriptor_protos().cloned().collect(),
        }
    }
}
