use serde_json::Value;

use crate::error::{LoadError, Result};

use super::schema::{
    Accessor, Buffer, BufferView, Checked, ComponentType, GenericComponentType, Root, Type, index,
    to_usize, to_usize64,
};

// ─── Component types ──────────────────────────────────────────────────────────

fn component_name(component_type: ComponentType) -> &'static str {
    match component_type {
        ComponentType::I8 => "BYTE",
        ComponentType::U8 => "UNSIGNED_BYTE",
        ComponentType::I16 => "SHORT",
        ComponentType::U16 => "UNSIGNED_SHORT",
        ComponentType::U32 => "UNSIGNED_INT",
        ComponentType::F32 => "FLOAT",
    }
}

fn type_name(kind: Type) -> &'static str {
    match kind {
        Type::Scalar => "SCALAR",
        Type::Vec2 => "VEC2",
        Type::Vec3 => "VEC3",
        Type::Vec4 => "VEC4",
        Type::Mat2 => "MAT2",
        Type::Mat3 => "MAT3",
        Type::Mat4 => "MAT4",
    }
}

const fn kind_of(components: usize) -> Type {
    match components {
        2 => Type::Vec2,
        3 => Type::Vec3,
        4 => Type::Vec4,
        9 => Type::Mat3,
        16 => Type::Mat4,
        _ => Type::Scalar,
    }
}

/// Declared component type and shape, when both are known values.
fn layout(accessor: &Accessor) -> Option<(ComponentType, Type)> {
    match (&accessor.component_type, &accessor.type_) {
        (Checked::Valid(GenericComponentType(component)), Checked::Valid(kind)) => {
            Some((*component, *kind))
        }
        _ => None,
    }
}

/// One little-endian numeric lane of an accessor element.
pub trait Component: Copy + Default {
    const COMPONENT_TYPE: ComponentType;
    const SIZE: usize;

    /// `bytes` holds at least [`Self::SIZE`] bytes.
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
    fn to_f32(self) -> f32;
}

macro_rules! component {
    ($ty:ty, $component_type:expr) => {
        impl Component for $ty {
            const COMPONENT_TYPE: ComponentType = $component_type;
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read_le(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                raw.copy_from_slice(&bytes[..<Self as Component>::SIZE]);
                <$ty>::from_le_bytes(raw)
            }

            fn write_le(self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }

            fn to_f32(self) -> f32 {
                self as f32
            }
        }
    };
}

component!(u8, ComponentType::U8);
component!(u16, ComponentType::U16);
component!(u32, ComponentType::U32);
component!(f32, ComponentType::F32);

/// A whole accessor element: a scalar or a fixed-size vector of components.
pub trait Element: Copy {
    const COMPONENT_TYPE: ComponentType;
    const KIND: Type;
    const COMPONENTS: usize;
    const SIZE: usize;

    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(&self, out: &mut Vec<u8>);
    fn component(&self, lane: usize) -> f32;
}

macro_rules! scalar_element {
    ($($ty:ty),*) => {
        $(
            impl Element for $ty {
                const COMPONENT_TYPE: ComponentType = <$ty as Component>::COMPONENT_TYPE;
                const KIND: Type = Type::Scalar;
                const COMPONENTS: usize = 1;
                const SIZE: usize = <$ty as Component>::SIZE;

                fn read_le(bytes: &[u8]) -> Self {
                    <$ty as Component>::read_le(bytes)
                }

                fn write_le(&self, out: &mut Vec<u8>) {
                    Component::write_le(*self, out);
                }

                fn component(&self, _lane: usize) -> f32 {
                    self.to_f32()
                }
            }
        )*
    };
}

scalar_element!(u8, u16, u32, f32);

impl<C: Component, const N: usize> Element for [C; N] {
    const COMPONENT_TYPE: ComponentType = C::COMPONENT_TYPE;
    const KIND: Type = kind_of(N);
    const COMPONENTS: usize = N;
    const SIZE: usize = C::SIZE * N;

    fn read_le(bytes: &[u8]) -> Self {
        std::array::from_fn(|lane| C::read_le(&bytes[lane * C::SIZE..]))
    }

    fn write_le(&self, out: &mut Vec<u8>) {
        for value in self {
            C::write_le(*value, out);
        }
    }

    fn component(&self, lane: usize) -> f32 {
        self[lane].to_f32()
    }
}

// ─── Reader ───────────────────────────────────────────────────────────────────

/// Index buffer in its declared width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indices {
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Indices {
    pub fn len(&self) -> usize {
        match self {
            Self::U16(values) => values.len(),
            Self::U32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_u32(self) -> Vec<u32> {
        match self {
            Self::U16(values) => values.into_iter().map(u32::from).collect(),
            Self::U32(values) => values,
        }
    }
}

/// Typed reads from the single embedded buffer of a glTF document.
pub struct AccessorReader<'a> {
    root: &'a Root,
    bin: Option<&'a [u8]>,
}

impl<'a> AccessorReader<'a> {
    pub fn new(root: &'a Root, bin: Option<&'a [u8]>) -> Self {
        Self { root, bin }
    }

    /// Slices a buffer view out of the embedded blob.
    pub fn bufferview_bytes(&self, view_index: usize) -> Result<&'a [u8]> {
        let view = self.root.buffer_views.get(view_index).ok_or_else(|| {
            LoadError::malformed(format!("bufferView {view_index} does not exist"))
        })?;
        let bin = self.embedded_buffer(view)?;
        let byte_offset = view.byte_offset.map_or(0, to_usize);
        let byte_length = to_usize(view.byte_length);
        byte_offset
            .checked_add(byte_length)
            .filter(|end| *end <= bin.len())
            .map(|end| &bin[byte_offset..end])
            .ok_or_else(|| {
                LoadError::Format(format!(
                    "bufferView {view_index} spans {}..{} but the binary chunk has {} bytes",
                    byte_offset,
                    byte_offset.saturating_add(byte_length),
                    bin.len()
                ))
            })
    }

    fn embedded_buffer(&self, view: &BufferView) -> Result<&'a [u8]> {
        if view.buffer.value() != 0 || self.root.buffers.len() > 1 {
            return Err(LoadError::UnsupportedFeature(format!(
                "buffer {} of {}: only a single embedded buffer is supported",
                view.buffer.value(),
                self.root.buffers.len()
            )));
        }
        if let Some(uri) = self.root.buffers.first().and_then(|buffer| buffer.uri.as_deref()) {
            return Err(LoadError::UnsupportedFeature(format!(
                "external buffer URI {:?}",
                truncate_uri(uri)
            )));
        }
        self.bin.ok_or_else(|| {
            LoadError::UnsupportedFeature("document has no binary chunk".to_string())
        })
    }

    fn accessor(&self, index: usize) -> Result<&'a Accessor> {
        self.root
            .accessors
            .get(index)
            .ok_or_else(|| LoadError::malformed(format!("accessor {index} does not exist")))
    }

    /// Reads `T` elements after checking the declared component type and shape.
    pub fn get_typed_accessor<T: Element>(&self, index: usize) -> Result<Vec<T>> {
        let accessor = self.accessor(index)?;
        if layout(accessor) != Some((T::COMPONENT_TYPE, T::KIND)) {
            return Err(mismatch(
                index,
                accessor,
                format!("{} {}", component_name(T::COMPONENT_TYPE), type_name(T::KIND)),
            ));
        }
        self.decode(index, accessor, T::SIZE, T::read_le)
    }

    /// Reads JOINTS_n as 16-bit slots from either unsigned byte or short storage.
    pub fn get_joints_accessor(&self, index: usize) -> Result<Vec<[u16; 4]>> {
        let accessor = self.accessor(index)?;
        match layout(accessor) {
            Some((ComponentType::U8, Type::Vec4)) => self.decode(index, accessor, 4, |bytes| {
                <[u8; 4]>::read_le(bytes).map(u16::from)
            }),
            Some((ComponentType::U16, Type::Vec4)) => {
                self.decode(index, accessor, 8, <[u16; 4]>::read_le)
            }
            _ => Err(mismatch(index, accessor, "UNSIGNED_BYTE/UNSIGNED_SHORT VEC4")),
        }
    }

    /// Reads WEIGHTS_n as floats. Unsigned byte and short storage is
    /// normalized to `0.0..=1.0`.
    pub fn get_weights_accessor(&self, index: usize) -> Result<Vec<[f32; 4]>> {
        let accessor = self.accessor(index)?;
        match layout(accessor) {
            Some((ComponentType::F32, Type::Vec4)) => {
                self.decode(index, accessor, 16, <[f32; 4]>::read_le)
            }
            Some((ComponentType::U8, Type::Vec4)) => self.decode(index, accessor, 4, |bytes| {
                <[u8; 4]>::read_le(bytes).map(|value| f32::from(value) / f32::from(u8::MAX))
            }),
            Some((ComponentType::U16, Type::Vec4)) => self.decode(index, accessor, 8, |bytes| {
                <[u16; 4]>::read_le(bytes).map(|value| f32::from(value) / f32::from(u16::MAX))
            }),
            _ => Err(mismatch(index, accessor, "FLOAT/UNSIGNED_BYTE/UNSIGNED_SHORT VEC4")),
        }
    }

    /// Reads an index buffer, keeping the declared width.
    pub fn get_index_accessor(&self, index: usize) -> Result<Indices> {
        let accessor = self.accessor(index)?;
        match layout(accessor) {
            Some((ComponentType::I16 | ComponentType::U16, Type::Scalar)) => self
                .decode(index, accessor, 2, <u16 as Element>::read_le)
                .map(Indices::U16),
            Some((ComponentType::U32, Type::Scalar)) => self
                .decode(index, accessor, 4, <u32 as Element>::read_le)
                .map(Indices::U32),
            Some((other, Type::Scalar)) => Err(LoadError::UnsupportedFeature(format!(
                "accessor {index} uses {} indices",
                component_name(other)
            ))),
            _ => Err(mismatch(index, accessor, "SCALAR")),
        }
    }

    /// Returns an embedded image's mime type and bytes.
    ///
    /// A missing `mimeType` is sniffed from the image header.
    pub fn image_mime_bytes(&self, image_index: usize) -> Result<(String, &'a [u8])> {
        let image = self
            .root
            .images
            .get(image_index)
            .ok_or_else(|| LoadError::malformed(format!("image {image_index} does not exist")))?;
        if let Some(uri) = &image.uri {
            return Err(LoadError::UnsupportedFeature(format!(
                "image {image_index} references URI {:?}",
                truncate_uri(uri)
            )));
        }
        let view = image.buffer_view.ok_or_else(|| {
            LoadError::malformed(format!("image {image_index} has neither uri nor bufferView"))
        })?;
        let bytes = self.bufferview_bytes(view.value())?;
        let mime = match &image.mime_type {
            Some(mime) => mime.0.clone(),
            None => image::guess_format(bytes)
                .map(|format| format.to_mime_type().to_string())
                .map_err(|_| {
                    LoadError::UnsupportedFeature(format!(
                        "image {image_index} has no mimeType and an unrecognized encoding"
                    ))
                })?,
        };
        Ok((mime, bytes))
    }

    fn decode<T>(
        &self,
        index: usize,
        accessor: &Accessor,
        element_size: usize,
        read: impl Fn(&[u8]) -> T,
    ) -> Result<Vec<T>> {
        if accessor.sparse.is_some() {
            return Err(LoadError::UnsupportedFeature(format!(
                "accessor {index} is sparse"
            )));
        }
        let view_index = accessor
            .buffer_view
            .ok_or_else(|| {
                LoadError::UnsupportedFeature(format!("accessor {index} has no bufferView"))
            })?
            .value();
        let bytes = self.bufferview_bytes(view_index)?;
        let count = to_usize(accessor.count);
        if count == 0 {
            return Ok(Vec::new());
        }

        let stride = self.root.buffer_views[view_index]
            .byte_stride
            .map_or(element_size, |stride| stride.0);
        if stride < element_size {
            return Err(LoadError::malformed(format!(
                "accessor {index} has byteStride {stride} below its element size {element_size}"
            )));
        }
        let byte_offset = accessor.byte_offset.map_or(0, to_usize);
        let end = stride
            .checked_mul(count - 1)
            .and_then(|span| span.checked_add(byte_offset))
            .and_then(|last| last.checked_add(element_size));
        if end.is_none_or(|end| end > bytes.len()) {
            return Err(LoadError::Format(format!(
                "accessor {index} reads {count} elements past the end of bufferView {view_index}"
            )));
        }

        Ok((0..count)
            .map(|element| {
                let start = byte_offset + element * stride;
                read(&bytes[start..start + element_size])
            })
            .collect())
    }
}

fn mismatch(index: usize, accessor: &Accessor, expected: impl Into<String>) -> LoadError {
    let found = match layout(accessor) {
        Some((component, kind)) => format!("{} {}", component_name(component), type_name(kind)),
        None => "an unknown component type or shape".to_string(),
    };
    LoadError::TypeMismatch {
        accessor: index,
        expected: expected.into(),
        found,
    }
}

/// Data URIs can be megabytes long.
fn truncate_uri(uri: &str) -> &str {
    match uri.char_indices().nth(64) {
        Some((cut, _)) => &uri[..cut],
        None => uri,
    }
}

// ─── Writer ───────────────────────────────────────────────────────────────────

/// Appends typed arrays to a growable blob, recording views and accessors.
#[derive(Debug, Default)]
pub struct AccessorWriter {
    pub buffer_views: Vec<BufferView>,
    pub accessors: Vec<Accessor>,
    pub bin: Vec<u8>,
}

impl AccessorWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes as a new buffer view and returns its index.
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        let byte_offset = self.bin.len();
        self.bin.extend_from_slice(data);
        self.buffer_views.push(BufferView {
            buffer: index(0),
            byte_length: to_usize64(data.len()),
            byte_offset: Some(to_usize64(byte_offset)),
            byte_stride: None,
            target: None,
            name: None,
            extensions: None,
            extras: Default::default(),
        });
        self.buffer_views.len() - 1
    }

    /// Serializes `values` tightly packed and returns the new accessor index.
    ///
    /// With `min_max`, per-component bounds are recorded, which glTF requires
    /// for POSITION.
    pub fn push_array<T: Element>(&mut self, values: &[T], min_max: bool) -> usize {
        let mut bytes = Vec::with_capacity(values.len() * T::SIZE);
        for value in values {
            value.write_le(&mut bytes);
        }
        let view = self.push_bytes(&bytes);

        let (min, max) = if min_max && !values.is_empty() {
            let mut min = vec![f32::INFINITY; T::COMPONENTS];
            let mut max = vec![f32::NEG_INFINITY; T::COMPONENTS];
            for value in values {
                for lane in 0..T::COMPONENTS {
                    min[lane] = min[lane].min(value.component(lane));
                    max[lane] = max[lane].max(value.component(lane));
                }
            }
            (Some(Value::from(min)), Some(Value::from(max)))
        } else {
            (None, None)
        };

        self.accessors.push(Accessor {
            buffer_view: Some(index(view)),
            byte_offset: None,
            count: to_usize64(values.len()),
            component_type: Checked::Valid(GenericComponentType(T::COMPONENT_TYPE)),
            type_: Checked::Valid(T::KIND),
            min,
            max,
            name: None,
            normalized: false,
            sparse: None,
            extensions: None,
            extras: Default::default(),
        });
        self.accessors.len() - 1
    }

    /// Moves the views, accessors and the single buffer into `root` and
    /// returns the blob for the binary chunk.
    pub fn finish(self, root: &mut Root) -> Vec<u8> {
        root.buffer_views = self.buffer_views;
        root.accessors = self.accessors;
        root.buffers = vec![Buffer {
            byte_length: to_usize64(self.bin.len()),
            uri: None,
            name: None,
            extensions: None,
            extras: Default::default(),
        }];
        self.bin
    }
}
