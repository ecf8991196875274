//! Protocol versions.
//!
//! Each version is a [`Revision`], a small record of what it adds on top of the version it
//! extends. Capability lookups walk down to the base, so a new version only declares its own
//! delta.
use bytes::BufMut;

use super::{ARCH_GENERIC, FB_PROTOCOL_FLAG, FB_PROTOCOL_MASK, PTYPE_BATCH_SEND, PTYPE_LAZY_SEND, PTYPE_RPC, ProtocolError};
use crate::xdr::XdrBufMut;

/// Feature introduced by a protocol revision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    /// Responses of free statement and close blob may be deferred.
    LazySend,
    /// Allocate and prepare statement in one round trip.
    PipelinedPrepare,
    /// Out of band `op_cancel`.
    Cancel,
    /// Authentication plugin exchange with `op_cont_auth`.
    AuthPlugins,
    /// Rows carry a null bitmap instead of per field null indicator.
    NullBitmap,
    /// Statement timeout sent on execute.
    StatementTimeout,
    /// Cursor flags sent on execute.
    CursorFlags,
    /// `op_fetch_scroll` and `op_info_cursor`.
    ScrollFetch,
    /// `op_inline_blob` and the max inline blob size sent on execute.
    InlineBlob,
}

/// Trailing field a revision appends to `op_execute`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecuteTail {
    /// Statement timeout in milliseconds.
    StatementTimeout,
    /// Cursor flags bitmask.
    CursorFlags,
    /// Max inline blob size in bytes.
    InlineBlobSize,
}

/// Values available to [`ExecuteTail`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecuteContext {
    pub timeout_millis: u32,
    pub cursor_flags: u32,
    pub max_inline_blob_size: u32,
}

impl ExecuteTail {
    fn write(self, ctx: &ExecuteContext, buf: &mut impl BufMut) {
        let value = match self {
            Self::StatementTimeout => ctx.timeout_millis,
            Self::CursorFlags => ctx.cursor_flags,
            Self::InlineBlobSize => ctx.max_inline_blob_size,
        };
        buf.put_u32(value);
    }
}

/// Delta of a protocol version over its base.
#[derive(Debug)]
pub struct Revision {
    number: u8,
    base: Option<&'static Revision>,
    adds: &'static [Capability],
    execute_tail: Option<ExecuteTail>,
    weight: i32,
}

use Capability::*;

macro_rules! revisions {
    ($(
        $name:ident = $number:literal $(: $base:ident)?, weight $weight:literal,
        [$($cap:ident),*] $(, tail $tail:ident)?;
    )*) => {
        $(
            static $name: Revision = Revision {
                number: $number,
                base: revisions!(@base $($base)?),
                adds: &[$($cap),*],
                execute_tail: revisions!(@tail $($tail)?),
                weight: $weight,
            };
        )*

        static REVISIONS: &[&Revision] = &[$(&$name),*];
    };
    (@base) => { None };
    (@base $base:ident) => { Some(&$base) };
    (@tail) => { None };
    (@tail $tail:ident) => { Some(ExecuteTail::$tail) };
}

revisions! {
    V10 = 10, weight 1, [];
    V11 = 11: V10, weight 2, [LazySend, PipelinedPrepare];
    V12 = 12: V11, weight 3, [Cancel];
    V13 = 13: V12, weight 4, [AuthPlugins, NullBitmap];
    V14 = 14: V13, weight 4, [];
    V15 = 15: V14, weight 5, [];
    V16 = 16: V15, weight 6, [StatementTimeout], tail StatementTimeout;
    V17 = 17: V16, weight 6, [];
    V18 = 18: V17, weight 7, [CursorFlags, ScrollFetch], tail CursorFlags;
    V19 = 19: V18, weight 8, [InlineBlob], tail InlineBlobSize;
}

impl Revision {
    /// Find revision by version number.
    pub fn of(number: u8) -> Option<&'static Revision> {
        REVISIONS.iter().copied().find(|r| r.number == number)
    }

    /// Returns the version number.
    pub fn number(&self) -> u8 {
        self.number
    }

    /// Returns the revision this one extends.
    pub fn base(&self) -> Option<&'static Revision> {
        self.base
    }

    /// Returns `true` if this or any base revision provides `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.adds.contains(&capability) || self.base.is_some_and(|b| b.supports(capability))
    }

    /// Write trailing `op_execute` fields, base revision first.
    pub fn write_execute_tail(&self, ctx: &ExecuteContext, buf: &mut impl BufMut) {
        if let Some(base) = self.base {
            base.write_execute_tail(ctx, buf);
        }
        if let Some(tail) = self.execute_tail {
            tail.write(ctx, buf);
        }
    }
}

/// Protocol version offered in `op_connect`.
#[derive(Clone, Copy, Debug)]
pub struct ProtocolDescriptor {
    version: i32,
    architecture: i32,
    min_type: i32,
    max_type: i32,
    weight: i32,
    compression: bool,
    revision: &'static Revision,
}

impl ProtocolDescriptor {
    /// Descriptor of given version number with default weight.
    ///
    /// Returns `None` for unsupported version.
    pub fn of(number: u8) -> Option<Self> {
        let revision = Revision::of(number)?;
        let version = match number {
            10 => 10,
            n => FB_PROTOCOL_FLAG | i32::from(n),
        };
        let max_type = match revision.supports(LazySend) {
            true => PTYPE_LAZY_SEND,
            false => PTYPE_BATCH_SEND,
        };
        Some(Self {
            version,
            architecture: ARCH_GENERIC,
            min_type: PTYPE_RPC,
            max_type,
            weight: revision.weight,
            compression: false,
            revision,
        })
    }

    /// Replace the weight.
    pub fn with_weight(mut self, weight: i32) -> Self {
        self.weight = weight;
        self
    }

    /// Wire version, flagged from version 11.
    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn architecture(&self) -> i32 {
        self.architecture
    }

    pub fn min_type(&self) -> i32 {
        self.min_type
    }

    pub fn max_type(&self) -> i32 {
        self.max_type
    }

    pub fn weight(&self) -> i32 {
        self.weight
    }

    pub fn compression(&self) -> bool {
        self.compression
    }

    pub fn revision(&self) -> &'static Revision {
        self.revision
    }

    /// Returns `true` if this version provides `capability`.
    pub fn supports(&self, capability: Capability) -> bool {
        self.revision.supports(capability)
    }

    fn matches(&self, version: i32, architecture: i32, ptype: i32) -> bool {
        self.version == version
            && self.architecture == architecture
            && (self.min_type..=self.max_type).contains(&ptype)
    }

    /// Write this descriptor as `op_connect` protocol entry.
    pub(crate) fn write(&self, buf: &mut impl BufMut) {
        buf.put_xdr_i32(self.version);
        buf.put_xdr_i32(self.architecture);
        buf.put_xdr_i32(self.min_type);
        buf.put_xdr_i32(self.max_type);
        buf.put_xdr_i32(self.weight);
    }
}

/// Set of descriptors offered to the server.
#[derive(Clone, Debug)]
pub struct ProtocolCollection {
    descriptors: Vec<ProtocolDescriptor>,
}

impl Default for ProtocolCollection {
    /// All versions from 10 to 19.
    fn default() -> Self {
        Self::of((10..=19).filter_map(ProtocolDescriptor::of))
    }
}

impl ProtocolCollection {
    /// Collection of given descriptors.
    pub fn of(descriptors: impl IntoIterator<Item = ProtocolDescriptor>) -> Self {
        Self { descriptors: descriptors.into_iter().collect() }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProtocolDescriptor> {
        self.descriptors.iter()
    }

    /// Highest weight descriptor of given wire version.
    pub fn get(&self, version: i32) -> Option<&ProtocolDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.version == version)
            .max_by_key(|d| d.weight)
    }

    /// Select descriptor matching the server accepted version.
    ///
    /// A negative version, sign extended by some servers, is normalized first. When multiple
    /// descriptors match, the highest weight wins.
    pub fn select(
        &self,
        version: i32,
        architecture: i32,
        ptype: i32,
    ) -> Result<&ProtocolDescriptor, ProtocolError> {
        let version = match version < 0 {
            true => (version & FB_PROTOCOL_MASK) | FB_PROTOCOL_FLAG,
            false => version,
        };
        self.descriptors
            .iter()
            .filter(|d| d.matches(version, architecture, ptype))
            .max_by_key(|d| d.weight)
            .ok_or(ProtocolError::UnsupportedVersion { version, architecture, ptype })
    }
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;

    #[test]
    fn capability_chain() {
        let v19 = Revision::of(19).unwrap();
        assert!(v19.supports(InlineBlob));
        assert!(v19.supports(LazySend));
        assert!(v19.supports(NullBitmap));

        let v12 = Revision::of(12).unwrap();
        assert!(v12.supports(Cancel));
        assert!(!v12.supports(NullBitmap));
        assert_eq!(v12.base().map(Revision::number), Some(11));

        assert!(!Revision::of(10).unwrap().supports(LazySend));
        assert!(Revision::of(9).is_none());
        assert!(Revision::of(20).is_none());
    }

    #[test]
    fn execute_tail() {
        let ctx = ExecuteContext { timeout_millis: 1, cursor_flags: 2, max_inline_blob_size: 3 };

        let mut buf = BytesMut::new();
        Revision::of(15).unwrap().write_execute_tail(&ctx, &mut buf);
        assert!(buf.is_empty());

        let mut buf = BytesMut::new();
        Revision::of(16).unwrap().write_execute_tail(&ctx, &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 1]);

        let mut buf = BytesMut::new();
        Revision::of(18).unwrap().write_execute_tail(&ctx, &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 1, 0, 0, 0, 2]);

        let mut buf = BytesMut::new();
        Revision::of(19).unwrap().write_execute_tail(&ctx, &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3]);
    }

    #[test]
    fn descriptor_defaults() {
        let v10 = ProtocolDescriptor::of(10).unwrap();
        assert_eq!(v10.version(), 10);
        assert_eq!(v10.max_type(), PTYPE_BATCH_SEND);

        let v13 = ProtocolDescriptor::of(13).unwrap();
        assert_eq!(v13.version(), 0x800D);
        assert_eq!(v13.min_type(), PTYPE_RPC);
        assert_eq!(v13.max_type(), PTYPE_LAZY_SEND);
        assert!(!v13.compression());

        let all = ProtocolCollection::default();
        assert_eq!(all.len(), 10);
        let weights = all.iter().map(ProtocolDescriptor::weight).collect::<Vec<_>>();
        assert!(weights.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn select_by_weight() {
        let v18 = ProtocolDescriptor::of(18).unwrap().with_weight(7);
        let v19 = ProtocolDescriptor::of(19).unwrap().with_weight(8);
        let collection = ProtocolCollection::of([v18, v19]);

        let selected = collection.select(0x8013, ARCH_GENERIC, PTYPE_LAZY_SEND).unwrap();
        assert_eq!(selected.weight(), 8);
        assert_eq!(selected.revision().number(), 19);
    }

    #[test]
    fn select_tie_break() {
        let low = ProtocolDescriptor::of(19).unwrap().with_weight(1);
        let high = ProtocolDescriptor::of(19).unwrap().with_weight(5);
        let collection = ProtocolCollection::of([low, high]);
        assert_eq!(collection.select(0x8013, 1, 5).unwrap().weight(), 5);
        assert_eq!(collection.get(0x8013).unwrap().weight(), 5);
    }

    #[test]
    fn select_negative_version() {
        let collection = ProtocolCollection::default();
        let selected = collection.select(0xFFFF_800Du32 as i32, ARCH_GENERIC, PTYPE_LAZY_SEND).unwrap();
        assert_eq!(selected.revision().number(), 13);
    }

    #[test]
    fn select_unknown() {
        let collection = ProtocolCollection::of(ProtocolDescriptor::of(18));
        assert!(matches!(
            collection.select(0x8013, ARCH_GENERIC, PTYPE_LAZY_SEND),
            Err(ProtocolError::UnsupportedVersion { version: 0x8013, .. })
        ));
        // type out of range
        assert!(collection.select(0x8012, ARCH_GENERIC, 9).is_err());
    }

    #[test]
    fn write_descriptor() {
        let mut buf = BytesMut::new();
        ProtocolDescriptor::of(10).unwrap().write(&mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 10, 0, 0, 0, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 1]);
    }
}
