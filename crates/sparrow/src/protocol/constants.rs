// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 sparrowd authors

//! Protocol constants: TLV ops, element sizes, encapsulation fields and
//! the well-known product/instance/variable tables.
//!
//! The 64-bit instance-type identifiers are burned into shipped firmware;
//! every value here must stay bit-exact for interoperability.

// =======================================================================
// TLV operations
// =======================================================================

pub const TLV_GET_REQUEST: u8 = 0;
pub const TLV_GET_RESPONSE: u8 = 1;
pub const TLV_SET_REQUEST: u8 = 2;
pub const TLV_SET_RESPONSE: u8 = 3;
pub const TLV_EVENT_REQUEST: u8 = 6;
pub const TLV_EVENT_RESPONSE: u8 = 7;

/// Set on the op byte for the vector variant of any operation.
pub const TLV_VECTOR_FLAG: u8 = 0x80;

// =======================================================================
// Element sizes (code -> 4 * 2^code bytes)
// =======================================================================

pub const SIZE32: u8 = 0;
pub const SIZE64: u8 = 1;
pub const SIZE128: u8 = 2;
pub const SIZE256: u8 = 3;
pub const SIZE512: u8 = 4;

/// Byte width of one element for an element-size code.
pub fn element_bytes(code: u8) -> usize {
    4usize << code
}

// =======================================================================
// Encapsulation header
// =======================================================================

pub const ENC_PAYLOAD_TLV: u8 = 1;
pub const ENC_PAYLOAD_SERIAL: u8 = 8;

/// Fingerprint modes and their extra header bytes.
pub const ENC_FP_NONE: u8 = 0; // 0 bytes
pub const ENC_FP_DEVID: u8 = 1; // 8 bytes
pub const ENC_FP_FIP4: u8 = 2; // 4 bytes
pub const ENC_FP_LENOPT: u8 = 3; // 4 bytes
pub const ENC_FP_DID_AND_FP: u8 = 4; // 16 bytes

pub const ENC_FP_LENOPT_OPTION_CRC: u16 = 1;
pub const ENC_FP_LENOPT_OPTION_SEQNO_CRC: u16 = 2;

/// CRC-32 of data followed by its own little-endian CRC-32 always leaves
/// this remainder; serial frames are validated against it.
pub const CRC_MAGIC_REMAINDER: u32 = 0x2144_DF1C;

/// The two-byte terminator closing every TLV list.
pub const NULL_TLV: [u8; 2] = [0, 0];

// =======================================================================
// Product types
// =======================================================================

pub const PRODUCT_DECIBEL: u64 = 0x0090_DA03_0101_0510;
pub const PRODUCT_CYCLOPS: u64 = 0x0090_DA03_0101_04B0;

// =======================================================================
// Instance types
// =======================================================================

pub const INSTANCE_GPIO: u64 = 0x0090_DA03_0201_0013;
pub const INSTANCE_BORDER_ROUTER: u64 = 0x0090_DA03_0201_0014;
pub const INSTANCE_ROUTER: u64 = 0x0090_DA03_0201_0015;
pub const INSTANCE_MOTION_GENERIC: u64 = 0x0090_DA03_0201_0016;
pub const INSTANCE_CO2: u64 = 0x0090_DA03_0201_0017;
pub const INSTANCE_TEMPHUM_GENERIC: u64 = 0x0090_DA03_0201_0018;
pub const INSTANCE_TEMP_GENERIC: u64 = 0x0090_DA03_0201_0019;
pub const INSTANCE_LAMP: u64 = 0x0090_DA03_0201_001A;
pub const INSTANCE_ACCELEROMETER: u64 = 0x0090_DA03_0201_001B;
pub const INSTANCE_RANGING_GENERIC: u64 = 0x0090_DA03_0201_001C;
pub const INSTANCE_BUTTON_GENERIC: u64 = 0x0090_DA03_0201_001D;
pub const INSTANCE_LEDS_GENERIC: u64 = 0x0090_DA03_0201_001E;
pub const INSTANCE_LIGHT_GENERIC: u64 = 0x0090_DA03_0201_0020;
pub const INSTANCE_SOUND_GENERIC: u64 = 0x0090_DA03_0201_0021;
pub const INSTANCE_AMBIENT_RGB_GENERIC: u64 = 0x0090_DA03_0201_0023;
pub const INSTANCE_IMAGE: u64 = 0x0090_DA03_0301_0010;
pub const INSTANCE_SHT20: u64 = 0x0090_DA03_0301_0011;
pub const INSTANCE_PTCTEMP: u64 = 0x0090_DA03_0301_0012;
pub const INSTANCE_ENERGY_METER: u64 = 0x0090_DA03_0301_0013;
pub const INSTANCE_RADIO: u64 = 0x0090_DA03_0301_0014;
pub const INSTANCE_SLEEP: u64 = 0x0090_DA03_0301_0017;
pub const INSTANCE_POWER_SINGLE: u64 = 0x0090_DA03_0301_0021;
pub const INSTANCE_BORDER_ROUTER_MANAGEMENT: u64 = 0x0090_DA03_0301_0022;
pub const INSTANCE_NETWORK_STATISTICS: u64 = 0x0090_DA03_0301_0023;

// =======================================================================
// Variables present in every instance
// =======================================================================

pub const VARIABLE_OBJECT_TYPE: u16 = 0x000;
pub const VARIABLE_OBJECT_ID: u16 = 0x001;
pub const VARIABLE_OBJECT_LABEL: u16 = 0x002;
pub const VARIABLE_NUMBER_OF_INSTANCES: u16 = 0x003;
pub const VARIABLE_OBJECT_SUB_TYPE: u16 = 0x004;
pub const VARIABLE_EVENT_ARRAY: u16 = 0x005;

// =======================================================================
// Instance 0 variables
// =======================================================================

pub const VARIABLE_UNIT_BOOT_TIMER: u16 = 0x0c9;
pub const VARIABLE_HARDWARE_RESET: u16 = 0x0ca;
pub const VARIABLE_SW_REVISION: u16 = 0x0cc;
pub const VARIABLE_CHASSIS_CAPABILITIES: u16 = 0x0e0;
pub const VARIABLE_BOOTLOADER_VERSION: u16 = 0x0e1;
pub const VARIABLE_TIME_SINCE_LAST_GOOD_UC_RX: u16 = 0x0e3;
pub const VARIABLE_IDENTIFY_CHASSIS: u16 = 0x0e4;
pub const VARIABLE_RESET_CAUSE: u16 = 0x0e5;
pub const VARIABLE_SLEEP_DEFAULT_AWAKE_TIME: u16 = 0x0d0;
pub const VARIABLE_CHASSIS_ACTIVITY_CYCLES_REQUEST: u16 = 0x0ec;

// Unit-controller (netselect / ownership) variables.
pub const VARIABLE_UNIT_CONTROLLER_WATCHDOG: u16 = 0x0c0;
pub const VARIABLE_UNIT_CONTROLLER_STATUS: u16 = 0x0c1;
pub const VARIABLE_UNIT_CONTROLLER_ADDRESS: u16 = 0x0c2;
pub const VARIABLE_LOCATION_ID: u16 = 0x0ce;

// =======================================================================
// Radio instance variables
// =======================================================================

pub const VARIABLE_RADIO_CHANNEL: u16 = 0x100;
pub const VARIABLE_RADIO_PAN_ID: u16 = 0x101;
pub const VARIABLE_RADIO_BEACON_RESPONSE: u16 = 0x102;
pub const VARIABLE_RADIO_MODE: u16 = 0x103;
pub const VARIABLE_RADIO_RESET_CAUSE: u16 = 0x10e;
pub const VARIABLE_RADIO_LINK_LAYER_KEY: u16 = 0x200;
pub const VARIABLE_RADIO_LINK_LAYER_SECURITY_LEVEL: u16 = 0x201;

// =======================================================================
// Sleep instance variables
// =======================================================================

pub const VARIABLE_SLEEP_AWAKE_TIME_WHEN_NO_ACTIVITY: u16 = 0x101;

// =======================================================================
// Device-specific variables
// =======================================================================

pub const VARIABLE_CO2: u16 = 0x100;
pub const VARIABLE_TEMPERATURE: u16 = 0x100;
pub const VARIABLE_HUMIDITY: u16 = 0x101;

pub const VARIABLE_GPIO_INPUT: u16 = 0x100;
pub const VARIABLE_GPIO_TRIGGER_COUNTER: u16 = 0x104;

pub const VARIABLE_NUMBER_OF_LEDS: u16 = 0x100;
pub const VARIABLE_LED_CONTROL: u16 = 0x101;
pub const VARIABLE_LED_SET: u16 = 0x102;
pub const VARIABLE_LED_CLEAR: u16 = 0x103;
pub const VARIABLE_LED_TOGGLE: u16 = 0x104;

// Routing table (router instance).
pub const VARIABLE_TABLE_LENGTH: u16 = 0x100;
pub const VARIABLE_TABLE_REVISION: u16 = 0x101;
pub const VARIABLE_TABLE: u16 = 0x102;
pub const VARIABLE_NETWORK_ADDRESS: u16 = 0x103;

// Network statistics.
pub const VARIABLE_NSTATS_DATA: u16 = 0x106;

// Energy meter.
pub const VARIABLE_TOTAL_ENERGY_CONSUMED: u16 = 0x100;
pub const VARIABLE_POWER: u16 = 0x101;
pub const VARIABLE_VOLTAGE: u16 = 0x102;
pub const VARIABLE_CURRENT: u16 = 0x103;
pub const VARIABLE_TOTAL_ACTIVE_TIME: u16 = 0x104;

// =======================================================================
// TLV error codes
// =======================================================================

pub const TLV_ERROR_NO_ERROR: u8 = 0;
pub const TLV_ERROR_UNKNOWN_VERSION: u8 = 1;
pub const TLV_ERROR_UNKNOWN_VARIABLE: u8 = 2;
pub const TLV_ERROR_UNKNOWN_INSTANCE: u8 = 3;
pub const TLV_ERROR_UNKNOWN_OP_CODE: u8 = 4;
pub const TLV_ERROR_UNKNOWN_ELEMENT_SIZE: u8 = 5;
pub const TLV_ERROR_BAD_NUMBER_OF_ELEMENTS: u8 = 6;
pub const TLV_ERROR_TIMEOUT: u8 = 7;
pub const TLV_ERROR_DEVICE_BUSY: u8 = 8;
pub const TLV_ERROR_HARDWARE_ERROR: u8 = 9;
pub const TLV_ERROR_BAD_LENGTH: u8 = 10;
pub const TLV_ERROR_WRITE_ACCESS_DENIED: u8 = 11;
pub const TLV_ERROR_UNKNOWN_BLOB_COMMAND: u8 = 12;
pub const TLV_ERROR_NO_VECTOR_ACCESS: u8 = 13;
pub const TLV_ERROR_UNEXPECTED_RESPONSE: u8 = 14;
pub const TLV_ERROR_INVALID_VECTOR_OFFSET: u8 = 15;
pub const TLV_ERROR_INVALID_ARGUMENT: u8 = 16;
pub const TLV_ERROR_READ_ACCESS_DENIED: u8 = 17;
pub const TLV_ERROR_UNPROCESSED_TLV: u8 = 18;

/// Human-readable name for a TLV error code.
pub fn tlv_error_name(error: u8) -> &'static str {
    match error {
        0 => "NO ERROR",
        1 => "UNKNOWN VERSION",
        2 => "UNKNOWN VARIABLE",
        3 => "UNKNOWN INSTANCE",
        4 => "UNKNOWN OP CODE",
        5 => "UNKNOWN ELEMENT SIZE",
        6 => "BAD NUMBER OF ELEMENTS",
        7 => "TIMEOUT",
        8 => "DEVICE BUSY",
        9 => "HARDWARE ERROR",
        10 => "BAD LENGTH",
        11 => "WRITE ACCESS DENIED",
        12 => "UNKNOWN BLOB COMMAND",
        13 => "NO VECTOR ACCESS",
        14 => "UNEXPECTED RESPONSE",
        15 => "INVALID VECTOR OFFSET",
        16 => "INVALID ARGUMENT",
        17 => "READ ACCESS DENIED",
        18 => "UNPROCESSED TLV",
        _ => "UNKNOWN",
    }
}

/// Human-readable name for a TLV op (vector flag ignored).
pub fn tlv_op_name(op: u8) -> &'static str {
    match op & !TLV_VECTOR_FLAG {
        TLV_GET_REQUEST => "GET REQUEST",
        TLV_GET_RESPONSE => "GET RESPONSE",
        TLV_SET_REQUEST => "SET REQUEST",
        TLV_SET_RESPONSE => "SET RESPONSE",
        TLV_EVENT_REQUEST => "EVENT REQUEST",
        TLV_EVENT_RESPONSE => "EVENT RESPONSE",
        _ => "UNKNOWN OP",
    }
}

/// Short op mnemonic used in compact log lines.
pub fn tlv_op_short_name(op: u8) -> &'static str {
    match op & !TLV_VECTOR_FLAG {
        TLV_GET_REQUEST => "G",
        TLV_GET_RESPONSE => "GR",
        TLV_SET_REQUEST => "S",
        TLV_SET_RESPONSE => "SR",
        TLV_EVENT_REQUEST => "E",
        TLV_EVENT_RESPONSE => "ER",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_bytes() {
        assert_eq!(element_bytes(SIZE32), 4);
        assert_eq!(element_bytes(SIZE64), 8);
        assert_eq!(element_bytes(SIZE128), 16);
        assert_eq!(element_bytes(SIZE256), 32);
        assert_eq!(element_bytes(SIZE512), 64);
    }

    #[test]
    fn test_well_known_table_is_bit_exact() {
        // Spot checks against values shipped in firmware.
        assert_eq!(INSTANCE_BORDER_ROUTER, 0x0090DA0302010014);
        assert_eq!(INSTANCE_BUTTON_GENERIC, 0x0090DA030201001D);
        assert_eq!(INSTANCE_NETWORK_STATISTICS, 0x0090DA0303010023);
        assert_eq!(INSTANCE_SLEEP, 0x0090DA0303010017);
        assert_eq!(VARIABLE_UNIT_CONTROLLER_WATCHDOG, 0x0c0);
        assert_eq!(VARIABLE_UNIT_CONTROLLER_ADDRESS, 0x0c2);
        assert_eq!(VARIABLE_NSTATS_DATA, 0x106);
        assert_eq!(CRC_MAGIC_REMAINDER, 0x2144DF1C);
    }

    #[test]
    fn test_names() {
        assert_eq!(tlv_error_name(8), "DEVICE BUSY");
        assert_eq!(tlv_error_name(200), "UNKNOWN");
        assert_eq!(tlv_op_name(TLV_GET_REQUEST | TLV_VECTOR_FLAG), "GET REQUEST");
        assert_eq!(tlv_op_short_name(TLV_EVENT_RESPONSE), "ER");
    }
}
