use std::sync::Arc;

use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
use log::warn;

use lodestar_gltf::document::types::ComponentType;

use crate::LoaderError;
use crate::extensions::Stage;
use crate::session::LoadSession;

/// A fully resolved accessor: `count` elements of `components` f32 values
/// each. Integer data arrives converted (normalized to `[-1,1]` / `[0,1]` or
/// plainly cast); index data has its own path, see `resolve_indices`.
#[derive(Debug, Clone)]
pub struct AccessorData {
    pub components: usize,
    pub count: usize,
    pub values: Vec<f32>,
}

impl AccessorData {
    /// Guards the unchecked element getters: callers consuming a fixed
    /// component count verify it up front so a document whose accessor type
    /// disagrees with the consuming semantic fails with a path instead of
    /// panicking.
    pub fn ensure_components(&self, needed: usize, path: &str) -> Result<(), LoaderError> {
        if self.components < needed {
            return Err(LoaderError::reference(
                path,
                format!(
                    "accessor holds {}-component elements where {} are required",
                    self.components, needed
                ),
            ));
        }
        Ok(())
    }

    pub fn scalar(&self, element: usize) -> f32 {
        self.values[element * self.components]
    }

    pub fn vec2(&self, element: usize) -> Vec2 {
        let base = element * self.components;
        Vec2::new(self.values[base], self.values[base + 1])
    }

    pub fn vec3(&self, element: usize) -> Vec3 {
        let base = element * self.components;
        Vec3::new(
            self.values[base],
            self.values[base + 1],
            self.values[base + 2],
        )
    }

    pub fn vec4(&self, element: usize) -> Vec4 {
        let base = element * self.components;
        Vec4::new(
            self.values[base],
            self.values[base + 1],
            self.values[base + 2],
            self.values[base + 3],
        )
    }

    pub fn quat(&self, element: usize) -> Quat {
        let base = element * self.components;
        Quat::from_xyzw(
            self.values[base],
            self.values[base + 1],
            self.values[base + 2],
            self.values[base + 3],
        )
    }

    pub fn mat4(&self, element: usize) -> Mat4 {
        let base = element * 16;
        let mut cols = [0.0; 16];
        cols.copy_from_slice(&self.values[base..base + 16]);
        Mat4::from_cols_array(&cols)
    }
}

impl LoadSession {
    pub async fn resolve_accessor(&self, index: usize) -> Result<Arc<AccessorData>, LoaderError> {
        let key = index as u64;
        if let Some(hit) = self.caches.accessors.peek(key) {
            return hit;
        }
        if let Some(claimed) = self
            .apply_extensions(Stage::Accessor, key, |ext, ctx| ext.load_accessor(ctx, index))
            .await?
        {
            self.caches.accessors.store_if_vacant(key, Ok(claimed.clone()));
            return Ok(claimed);
        }
        self.caches
            .accessors
            .get_or_resolve(key, Box::pin(self.load_accessor_default(index)))
            .await
    }

    async fn load_accessor_default(&self, index: usize) -> Result<Arc<AccessorData>, LoaderError> {
        self.check_disposed()?;
        let accessor = self.graph().accessor(index)?;
        let path = format!("/accessors/{}", index);
        let components = accessor.element_type.components();

        // Without a buffer view the accessor is a zero-filled base, which a
        // sparse overlay then populates.
        let mut values = match accessor.buffer_view {
            None => vec![0.0; accessor.count * components],
            Some(view_index) => {
                let view = self.graph().buffer_view(view_index)?;
                let window = self.resolve_buffer_view(view_index).await?;
                decode_elements(
                    window.bytes(),
                    accessor.byte_offset,
                    accessor.component_type,
                    accessor.normalized,
                    accessor.count,
                    components,
                    view.byte_stride,
                    &path,
                )?
            }
        };

        if let Some(sparse) = &accessor.sparse {
            // The overlay is strictly sequenced after the base array exists.
            let indices = self
                .resolve_sparse_indices(sparse.indices.buffer_view, sparse.indices.byte_offset, sparse.indices.component_type, sparse.count, &path)
                .await?;
            let replacement_window = self.resolve_buffer_view(sparse.values.buffer_view).await?;
            let replacements = decode_elements(
                replacement_window.bytes(),
                sparse.values.byte_offset,
                accessor.component_type,
                accessor.normalized,
                sparse.count,
                components,
                None,
                &path,
            )?;

            for (slot, &element) in indices.iter().enumerate() {
                let element = element as usize;
                if element >= accessor.count {
                    warn!(
                        "{}: sparse index {} exceeds the accessor count {}, skipping",
                        path, element, accessor.count
                    );
                    continue;
                }
                values[element * components..(element + 1) * components]
                    .copy_from_slice(&replacements[slot * components..(slot + 1) * components]);
            }
        }

        self.counters.accessors_resolved();
        Ok(Arc::new(AccessorData {
            components,
            count: accessor.count,
            values,
        }))
    }

    async fn resolve_sparse_indices(
        &self,
        view_index: usize,
        byte_offset: usize,
        component_type: ComponentType,
        count: usize,
        path: &str,
    ) -> Result<Vec<u32>, LoaderError> {
        let window = self.resolve_buffer_view(view_index).await?;
        read_index_sequence(window.bytes(), byte_offset, component_type, count, path)
    }

    /// Index data of a primitive, widened to u32. Memoized separately from the
    /// float view of the same accessor.
    pub async fn resolve_indices(&self, index: usize) -> Result<Arc<Vec<u32>>, LoaderError> {
        self.caches
            .indices
            .get_or_resolve(index as u64, Box::pin(self.load_indices_default(index)))
            .await
    }

    async fn load_indices_default(&self, index: usize) -> Result<Arc<Vec<u32>>, LoaderError> {
        let accessor = self.graph().accessor(index)?;
        let path = format!("/accessors/{}", index);

        let Some(view_index) = accessor.buffer_view else {
            return Err(LoaderError::reference(path, "index accessor without a buffer view"));
        };
        let view = self.graph().buffer_view(view_index)?;
        if view.byte_stride.is_some() {
            warn!("{}: index data must be tightly packed, ignoring byteStride", path);
        }
        let window = self.resolve_buffer_view(view_index).await?;
        let indices = read_index_sequence(
            window.bytes(),
            accessor.byte_offset,
            accessor.component_type,
            accessor.count,
            &path,
        )?;
        Ok(Arc::new(indices))
    }
}

/// Reads `count` tightly packed unsigned integers, widening to u32.
fn read_index_sequence(
    bytes: &[u8],
    byte_offset: usize,
    component_type: ComponentType,
    count: usize,
    path: &str,
) -> Result<Vec<u32>, LoaderError> {
    let size = component_type.byte_size();
    let needed = byte_offset + count * size;
    if needed > bytes.len() {
        return Err(LoaderError::reference(
            path,
            format!("{} bytes of index data needed, {} available", needed, bytes.len()),
        ));
    }

    let data = &bytes[byte_offset..];
    let indices = match component_type {
        ComponentType::UnsignedByte => data[..count].iter().map(|&v| v as u32).collect(),
        ComponentType::UnsignedShort => data[..count * 2]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]) as u32)
            .collect(),
        ComponentType::UnsignedInt => data[..count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        other => {
            return Err(LoaderError::unsupported(
                path,
                format!("index component type {:?}", other),
            ));
        }
    };
    Ok(indices)
}

/// De-interleaves `count` elements of `components` values each, honoring the
/// view's stride and converting normalized integers to floats. Tightly packed
/// f32 data takes the bulk path.
#[allow(clippy::too_many_arguments)]
pub(crate) fn decode_elements(
    bytes: &[u8],
    byte_offset: usize,
    component_type: ComponentType,
    normalized: bool,
    count: usize,
    components: usize,
    byte_stride: Option<usize>,
    path: &str,
) -> Result<Vec<f32>, LoaderError> {
    let component_size = component_type.byte_size();
    let tight = components * component_size;
    let stride = byte_stride.unwrap_or(tight);

    if count > 0 {
        let last_end = byte_offset + (count - 1) * stride + tight;
        if last_end > bytes.len() {
            return Err(LoaderError::reference(
                path,
                format!("{} bytes of element data needed, {} available", last_end, bytes.len()),
            ));
        }
    }

    if component_type == ComponentType::Float && !normalized && stride == tight {
        return Ok(bytes[byte_offset..byte_offset + count * tight]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect());
    }

    let mut values = Vec::with_capacity(count * components);
    for element in 0..count {
        let base = byte_offset + element * stride;
        for component in 0..components {
            let at = base + component * component_size;
            values.push(read_component(bytes, at, component_type, normalized));
        }
    }
    Ok(values)
}

fn read_component(bytes: &[u8], at: usize, component_type: ComponentType, normalized: bool) -> f32 {
    match component_type {
        ComponentType::Byte => {
            let v = bytes[at] as i8;
            if normalized {
                (v as f32 / 127.0).max(-1.0)
            } else {
                v as f32
            }
        }
        ComponentType::UnsignedByte => {
            let v = bytes[at];
            if normalized { v as f32 / 255.0 } else { v as f32 }
        }
        ComponentType::Short => {
            let v = i16::from_le_bytes([bytes[at], bytes[at + 1]]);
            if normalized {
                (v as f32 / 32767.0).max(-1.0)
            } else {
                v as f32
            }
        }
        ComponentType::UnsignedShort => {
            let v = u16::from_le_bytes([bytes[at], bytes[at + 1]]);
            if normalized { v as f32 / 65535.0 } else { v as f32 }
        }
        ComponentType::UnsignedInt => {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as f32
        }
        ComponentType::Float => {
            f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        }
    }
}
