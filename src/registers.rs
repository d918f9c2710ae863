use std::fmt;
use std::str::FromStr;

pub const STATE_REGISTER: RegisterId = RegisterId::new_const("30001");
pub const ERROR_REGISTER: RegisterId = RegisterId::new_const("30002");
pub const POWER_REGISTER: RegisterId = RegisterId::new_const("20364");

/// State register values for which the stove counts as switched off.
const STATE_OFF_VALUES: [i64; 4] = [0, 7, 8, 9];

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is not a 5 digit register id")]
pub struct InvalidRegisterId(pub String);

/// A stove parameter, identified by exactly five ASCII digits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegisterId([u8; 5]);

impl RegisterId {
    pub const LEN: usize = 5;

    /// Construct a register id in a `const` context, panicking on malformed input.
    pub const fn new_const(id: &'static str) -> Self {
        match Self::from_bytes(id.as_bytes()) {
            Some(id) => id,
            None => panic!("register ids must be exactly 5 ASCII digits"),
        }
    }

    pub const fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let &[a, b, c, d, e] = bytes else {
            return None;
        };
        let digits = [a, b, c, d, e];
        let mut idx = 0;
        while idx < digits.len() {
            if !digits[idx].is_ascii_digit() {
                return None;
            }
            idx += 1;
        }
        Some(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        match std::str::from_utf8(&self.0) {
            Ok(s) => s,
            Err(_) => unreachable!("register ids only hold ASCII digits"),
        }
    }

    pub fn info(&self) -> Option<&'static RegisterInfo> {
        CATALOG.binary_search_by_key(self, |r| r.id).ok().map(|idx| &CATALOG[idx])
    }

    /// Human name of the register, `unknown` for ids outside of the catalog.
    pub fn name(&self) -> &'static str {
        self.info().and_then(|i| i.name).unwrap_or("unknown")
    }

    pub fn unit(&self) -> Unit {
        self.info().map(|i| i.unit).unwrap_or(Unit::None)
    }
}

impl FromStr for RegisterId {
    type Err = InvalidRegisterId;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes()).ok_or_else(|| InvalidRegisterId(s.to_string()))
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegisterId({})", self.as_str())
    }
}

impl serde::Serialize for RegisterId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// The single character class tag the stove sends in front of every reading.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Marker(pub char);

impl Marker {
    /// Readings carrying this marker may be written with a set-value command.
    pub const SETTABLE: Self = Self('B');

    pub fn is_settable(&self) -> bool {
        *self == Self::SETTABLE
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Marker({:?})", self.0)
    }
}

impl serde::Serialize for Marker {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, strum::IntoStaticStr)]
pub enum Unit {
    #[strum(serialize = "")]
    None,
    #[strum(serialize = "°C")]
    Celsius,
    #[strum(serialize = "mbar")]
    Millibar,
    #[strum(serialize = "Pa")]
    Pascal,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.into())
    }
}

/// Presentation names for the raw values of an enumerated register.
pub struct NameTable {
    kind: &'static str,
    entries: &'static [(i64, &'static str)],
}

impl NameTable {
    pub fn lookup(&self, value: i64) -> Option<&'static str> {
        self.entries.iter().find(|(v, _)| *v == value).map(|(_, name)| *name)
    }

    pub fn entries(&self) -> &'static [(i64, &'static str)] {
        self.entries
    }

    pub fn describe(&self, value: i64) -> String {
        match self.lookup(value) {
            Some(name) => name.to_string(),
            None => format!("unknown {} {value}", self.kind),
        }
    }
}

pub static MODE_NAMES: NameTable = NameTable {
    kind: "mode",
    entries: &[
        (0, "OFF"),
        (1, "Check Up"),
        (2, "Ignition"),
        (3, "Stabilization"),
        (4, "Ignition"),
        (5, "Run"),
        (6, "Modulation"),
        (7, "Extinguishing"),
        (8, "Safety"),
        (9, "Block"),
        (10, "Recover Ignition"),
        (11, "Standby"),
        (30, "Ignition"),
        (31, "Ignition"),
        (32, "Ignition"),
        (33, "Ignition"),
        (34, "Ignition"),
    ],
};

pub static ERROR_NAMES: NameTable = NameTable {
    kind: "error",
    entries: &[
        (0, "No"),
        (1, "Safety Thermostat HV1: signalled also in case of Stove OFF"),
        (2, "Safety PressureSwitch HV2: signalled with Combustion Fan ON"),
        (3, "Extinguishing for Exhausting Temperature lowering"),
        (4, "Extinguishing for water over Temperature"),
        (5, "Extinguishing for Exhausting over Temperature"),
        (7, "Encoder Error: No Encoder Signal (in case of P25=1 or 2)"),
        (8, "Encoder Error: Combustion Fan regulation failed (in case of P25=1 or 2)"),
        (9, "Low pressure in to the Boiler"),
        (10, "High pressure in to the Boiler Error"),
        (11, "DAY and TIME not correct due to prolonged absence of Power Supply"),
        (12, "Failed Ignition"),
        (13, "Ignition"),
        (14, "Ignition"),
        (15, "Lack of Voltage Supply"),
        (16, "Ignition"),
        (17, "Ignition"),
        (18, "Lack of Voltage Supply"),
    ],
};

pub static POWER_NAMES: NameTable = NameTable {
    kind: "power",
    entries: &[(1, "P1"), (2, "P2"), (3, "P3"), (4, "P4"), (5, "P5"), (6, "P6"), (7, "Auto")],
};

pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: Option<&'static str>,
    pub unit: Unit,
    pub names: Option<&'static NameTable>,
}

/// Presentation text for a raw register value.
///
/// Enumerated registers map through their name table, everything else prints the integer.
pub fn describe(register: RegisterId, value: i64) -> String {
    match register.info().and_then(|i| i.names) {
        Some(table) => table.describe(value),
        None => value.to_string(),
    }
}

/// Whether a switch-like register reports the "on" state for the given raw value.
///
/// Returns `None` for registers that do not double as switches.
pub fn switch_state(register: RegisterId, value: i64) -> Option<bool> {
    if register == STATE_REGISTER {
        Some(!STATE_OFF_VALUES.contains(&value))
    } else if register == ERROR_REGISTER {
        Some(value != 0)
    } else {
        None
    }
}

macro_rules! catalog {
    (@names) => { None };
    (@names $names: ident) => { Some(&$names) };
    ($($id: literal: $unit: ident, $name: expr $(, names = $names: ident)?;)*) => {
        pub static CATALOG: &[RegisterInfo] = &[$(RegisterInfo {
            id: RegisterId::new_const($id),
            name: $name,
            unit: Unit::$unit,
            names: catalog!(@names $($names)?),
        },)*];

        const _ASSERT_CATALOG_SORTED: () = const {
            let ids = [$(RegisterId::new_const($id).0,)*];
            let mut idx = 1;
            while idx < ids.len() {
                let (prev, next) = (ids[idx - 1], ids[idx]);
                let mut byte = 0;
                while byte < RegisterId::LEN && prev[byte] == next[byte] {
                    byte += 1;
                }
                assert!(byte < RegisterId::LEN && prev[byte] < next[byte], "catalog must be sorted");
                idx += 1;
            }
        };
    };
}

catalog! {
    "20180": Celsius, Some("Boiler target");
    "20199": Celsius, Some("Boiler target");
    "20205": None, None;
    "20206": None, None;
    "20211": None, None;
    "20225": None, None;
    "20364": None, Some("Power setting"), names = POWER_NAMES;
    "20365": None, None;
    "20366": None, None;
    "20369": None, None;
    "20374": None, None;
    "20375": None, None;
    "20381": None, None;
    "20493": Celsius, Some("Room temperature set point");
    "20570": None, None;
    "20575": None, None;
    "20801": None, Some("Heating power");
    "20803": None, None;
    "20813": None, None;
    "21700": Celsius, Some("Room thermostat");
    "30001": None, Some("State"), names = MODE_NAMES;
    "30002": None, Some("Error"), names = ERROR_NAMES;
    "30003": None, Some("Timer");
    "30004": None, Some("Ignition");
    "30005": Celsius, Some("Exhaust temperature");
    "30006": Celsius, Some("Room temperature");
    "30007": None, Some("Inputs");
    "30008": None, Some("Combustion fan");
    "30009": None, Some("Heating fan");
    "30011": None, Some("Combustion power");
    "30012": Celsius, Some("Puffer temperature");
    "30015": None, None;
    "30017": Celsius, Some("Boiler water");
    "30020": Millibar, Some("Water pressure");
    "30025": None, Some("Combustion fan real speed");
    "30026": Celsius, None;
    "30033": Pascal, Some("Exhaust depression");
    "30040": None, None;
    "30044": None, None;
    "30084": None, None;
    "40007": None, None;
    "40016": None, Some("Outputs");
    "50001": None, Some("Auger on");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_register_ids() {
        assert_eq!("30001".parse::<RegisterId>(), Ok(STATE_REGISTER));
        assert!("3000".parse::<RegisterId>().is_err());
        assert!("300011".parse::<RegisterId>().is_err());
        assert!("3a001".parse::<RegisterId>().is_err());
    }

    #[test]
    fn unknown_registers_are_labelled_not_rejected() {
        let id: RegisterId = "99999".parse().unwrap();
        assert!(id.info().is_none());
        assert_eq!(id.name(), "unknown");
        assert_eq!(id.unit(), Unit::None);
        assert_eq!(describe(id, 42), "42");
    }

    #[test]
    fn catalog_lookups() {
        let boiler = RegisterId::new_const("30017");
        assert_eq!(boiler.name(), "Boiler water");
        assert_eq!(boiler.unit().to_string(), "°C");
        assert_eq!(RegisterId::new_const("20205").name(), "unknown");
    }

    #[test]
    fn enumerated_values_map_through_tables() {
        assert_eq!(describe(STATE_REGISTER, 5), "Run");
        assert_eq!(describe(STATE_REGISTER, 31), "Ignition");
        assert_eq!(describe(STATE_REGISTER, 42), "unknown mode 42");
        assert_eq!(describe(ERROR_REGISTER, 12), "Failed Ignition");
        assert_eq!(describe(ERROR_REGISTER, 6), "unknown error 6");
        assert_eq!(describe(POWER_REGISTER, 7), "Auto");
    }

    #[test]
    fn switch_states() {
        assert_eq!(switch_state(STATE_REGISTER, 5), Some(true));
        for off in [0, 7, 8, 9] {
            assert_eq!(switch_state(STATE_REGISTER, off), Some(false));
        }
        assert_eq!(switch_state(ERROR_REGISTER, 0), Some(false));
        assert_eq!(switch_state(ERROR_REGISTER, 3), Some(true));
        assert_eq!(switch_state(POWER_REGISTER, 3), None);
    }

    #[test]
    fn settable_marker() {
        assert!(Marker('B').is_settable());
        assert!(!Marker('I').is_settable());
    }
}
