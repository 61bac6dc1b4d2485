use crate::decode::{
    BASE_STATUS_LAYOUT, BATTERY_DYNAMIC_LAYOUT, BATTERY_STATIC_LAYOUT, BATTERY_STATUS_LAYOUT, DecodedPayload,
    FieldSpec, POWER_SOURCE_LAYOUT, decode,
};
use crate::error::ECError;
use std::fmt;

/// Addressing triple of an EC request: which object (target class and
/// instance) and which method (command id) to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestDescriptor {
    pub target_class: u8,
    pub instance_id: u8,
    pub command_id: u8,
}

impl RequestDescriptor {
    pub const fn new(target_class: u8, instance_id: u8, command_id: u8) -> Self {
        Self {
            target_class,
            instance_id,
            command_id,
        }
    }
}

/// Target class of the lid/base object
const TC_BASE: u8 = 0x11;
/// Target class of batteries and the AC adapter
const TC_BATTERY: u8 = 0x02;

const CID_STA: u8 = 0x01;
const CID_BIX: u8 = 0x02;
const CID_BST: u8 = 0x03;
const CID_PSR: u8 = 0x0d;
const CID_GBOS: u8 = 0x0d;

/// The request kinds the EC answers. Instance numbers select the adapter or battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// `GBOS`: base attach status
    BaseStatus,
    /// `_PSR`: AC power source
    PowerSource(u8),
    /// `_STA`: battery status
    BatteryStatus(u8),
    /// `_BST`: dynamic battery information
    BatteryDynamic(u8),
    /// `_BIX`: static battery information
    BatteryStatic(u8),
}

impl Request {
    pub fn descriptor(&self) -> RequestDescriptor {
        match *self {
            Request::BaseStatus => RequestDescriptor::new(TC_BASE, 0x00, CID_GBOS),
            Request::PowerSource(n) => RequestDescriptor::new(TC_BATTERY, n, CID_PSR),
            Request::BatteryStatus(n) => RequestDescriptor::new(TC_BATTERY, n, CID_STA),
            Request::BatteryDynamic(n) => RequestDescriptor::new(TC_BATTERY, n, CID_BST),
            Request::BatteryStatic(n) => RequestDescriptor::new(TC_BATTERY, n, CID_BIX),
        }
    }

    pub fn layout(&self) -> &'static [FieldSpec] {
        match self {
            Request::BaseStatus => BASE_STATUS_LAYOUT,
            Request::PowerSource(_) => POWER_SOURCE_LAYOUT,
            Request::BatteryStatus(_) => BATTERY_STATUS_LAYOUT,
            Request::BatteryDynamic(_) => BATTERY_DYNAMIC_LAYOUT,
            Request::BatteryStatic(_) => BATTERY_STATIC_LAYOUT,
        }
    }

    pub fn decode(&self, payload: &[u8]) -> Result<DecodedPayload, ECError> {
        decode(self.layout(), payload)
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Request::BaseStatus => write!(f, "LID0.GBOS"),
            Request::PowerSource(n) => write!(f, "ADP{}._PSR", n),
            Request::BatteryStatus(n) => write!(f, "BAT{}._STA", n),
            Request::BatteryDynamic(n) => write!(f, "BAT{}._BST", n),
            Request::BatteryStatic(n) => write!(f, "BAT{}._BIX", n),
        }
    }
}
