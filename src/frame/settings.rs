use bytes::BufMut;

use crate::frame::{error::Error, Head, Kind, StreamId};

const ACK: u8 = 0x1;

pub const DEFAULT_HEADER_TABLE_SIZE: u32 = 4_096;
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
pub const MAX_MAX_FRAME_SIZE: u32 = (1 << 24) - 1;
pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;

/// A SETTINGS frame, or one peer's settings state.
///
/// Unset fields mean "not advertised"; the RFC defaults apply until a value
/// is advertised and acknowledged.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Settings {
    ack: bool,
    header_table_size: Option<u32>,
    enable_push: Option<u32>,
    max_concurrent_streams: Option<u32>,
    initial_window_size: Option<u32>,
    max_frame_size: Option<u32>,
    max_header_list_size: Option<u32>,
}

/// Recognized setting identifiers (RFC 7540 §6.5.2).
enum SettingId {
    HeaderTableSize = 0x1,
    EnablePush = 0x2,
    MaxConcurrentStreams = 0x3,
    InitialWindowSize = 0x4,
    MaxFrameSize = 0x5,
    MaxHeaderListSize = 0x6,
}

impl Settings {
    pub fn ack() -> Settings {
        Settings {
            ack: true,
            ..Settings::default()
        }
    }

    pub fn is_ack(&self) -> bool {
        self.ack
    }

    pub fn load(head: Head, payload: &[u8]) -> Result<Settings, Error> {
        debug_assert_eq!(head.kind(), Kind::Settings);

        if !head.stream_id().is_zero() {
            return Err(Error::InvalidStreamId);
        }

        if head.flag() & ACK == ACK {
            if !payload.is_empty() {
                return Err(Error::InvalidPayloadAckSettings);
            }
            return Ok(Settings::ack());
        }

        if payload.len() % 6 != 0 {
            return Err(Error::InvalidPayloadLength);
        }

        let mut settings = Settings::default();
        for chunk in payload.chunks(6) {
            let id = u16::from_be_bytes([chunk[0], chunk[1]]);
            let value = u32::from_be_bytes([chunk[2], chunk[3], chunk[4], chunk[5]]);

            match id {
                0x1 => settings.header_table_size = Some(value),
                0x2 => {
                    if value > 1 {
                        return Err(Error::InvalidSettingValue);
                    }
                    settings.enable_push = Some(value);
                }
                0x3 => settings.max_concurrent_streams = Some(value),
                0x4 => {
                    if value > MAX_INITIAL_WINDOW_SIZE {
                        return Err(Error::InvalidSettingValue);
                    }
                    settings.initial_window_size = Some(value);
                }
                0x5 => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&value) {
                        return Err(Error::InvalidSettingValue);
                    }
                    settings.max_frame_size = Some(value);
                }
                0x6 => settings.max_header_list_size = Some(value),
                // Unknown identifiers MUST be ignored.
                _ => {}
            }
        }

        Ok(settings)
    }

    pub fn encode<B: BufMut>(&self, dst: &mut B) {
        let payload_len = self.payload_len();
        let flag = if self.ack { ACK } else { 0 };
        let head = Head::new(Kind::Settings, flag, StreamId::ZERO);
        head.encode(payload_len, Kind::Settings as u8, dst);

        self.for_each(|id, value| {
            dst.put_u16(id as u16);
            dst.put_u32(value);
        });
    }

    fn payload_len(&self) -> usize {
        let mut count = 0;
        self.for_each(|_, _| count += 1);
        count * 6
    }

    fn for_each<F: FnMut(SettingId, u32)>(&self, mut f: F) {
        if let Some(v) = self.header_table_size {
            f(SettingId::HeaderTableSize, v);
        }
        if let Some(v) = self.enable_push {
            f(SettingId::EnablePush, v);
        }
        if let Some(v) = self.max_concurrent_streams {
            f(SettingId::MaxConcurrentStreams, v);
        }
        if let Some(v) = self.initial_window_size {
            f(SettingId::InitialWindowSize, v);
        }
        if let Some(v) = self.max_frame_size {
            f(SettingId::MaxFrameSize, v);
        }
        if let Some(v) = self.max_header_list_size {
            f(SettingId::MaxHeaderListSize, v);
        }
    }

    /// Overlay every field advertised by `other` onto `self`.
    pub fn merge(&mut self, other: &Settings) {
        if other.header_table_size.is_some() {
            self.header_table_size = other.header_table_size;
        }
        if other.enable_push.is_some() {
            self.enable_push = other.enable_push;
        }
        if other.max_concurrent_streams.is_some() {
            self.max_concurrent_streams = other.max_concurrent_streams;
        }
        if other.initial_window_size.is_some() {
            self.initial_window_size = other.initial_window_size;
        }
        if other.max_frame_size.is_some() {
            self.max_frame_size = other.max_frame_size;
        }
        if other.max_header_list_size.is_some() {
            self.max_header_list_size = other.max_header_list_size;
        }
    }

    // ===== accessors =====

    pub fn header_table_size(&self) -> Option<u32> {
        self.header_table_size
    }

    pub fn is_push_enabled(&self) -> bool {
        self.enable_push.map_or(true, |v| v == 1)
    }

    pub fn max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    pub fn initial_window_size(&self) -> Option<u32> {
        self.initial_window_size
    }

    pub fn max_frame_size(&self) -> Option<u32> {
        self.max_frame_size
    }

    pub fn max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    // ===== setters =====

    pub fn set_header_table_size(&mut self, size: Option<u32>) {
        self.header_table_size = size;
    }

    pub fn set_enable_push(&mut self, enable: bool) {
        self.enable_push = Some(enable as u32);
    }

    pub fn set_max_concurrent_streams(&mut self, max: Option<u32>) {
        self.max_concurrent_streams = max;
    }

    pub fn set_initial_window_size(&mut self, size: Option<u32>) {
        self.initial_window_size = size;
    }

    pub fn set_max_frame_size(&mut self, size: Option<u32>) {
        self.max_frame_size = size;
    }

    pub fn set_max_header_list_size(&mut self, size: Option<u32>) {
        self.max_header_list_size = size;
    }
}
