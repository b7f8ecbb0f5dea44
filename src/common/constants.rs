//! Application-wide constants
//!
//! This module contains the magic numbers and string literals used throughout
//! the application, providing a single source of truth for constant values.

/// Filesystem locations
pub mod paths {
    /// Default location of the JSON configuration file
    pub const CONFIG_FILE: &str = "/etc/tnk/config.json";

    /// Environment variable that overrides [`CONFIG_FILE`]
    pub const CONFIG_ENV: &str = "TNK_CONFIG";

    /// Shared data directory holding the user script
    pub const DATA_DIR: &str = "/usr/local/share/totally-normal-keyboard";

    /// Script file name inside the data directory
    pub const SCRIPT_FILE: &str = "main.rhai";

    /// System keyboard layout configuration (Debian console-setup format)
    pub const KEYBOARD_CONFIG: &str = "/etc/default/keyboard";

    /// Gadget control script, resolved next to the executable
    pub const GADGET_SCRIPT: &str = "usb-gadget.sh";

    /// sysfs class directory listing raw HID devices
    pub const SYS_CLASS_HIDRAW: &str = "/sys/class/hidraw";

    pub const DEV_ROOT: &str = "/dev";

    /// Device node prefix of the USB HID gadget functions (`/dev/hidg0`, ...)
    pub const GADGET_NODE_PREFIX: &str = "/dev/hidg";
}

/// Privilege separation
pub mod privileges {
    /// Environment variable naming the account the worker drops into
    pub const DROP_USER_ENV: &str = "TNK_DROP_USER";

    pub const DEFAULT_DROP_USER: &str = "nobody";
}

/// Process exit codes
pub mod exit {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    /// Added to the signal number when terminated by a signal
    pub const SIGNAL_BASE: i32 = 128;
}

/// USB HID constants
pub mod hid {
    /// Size of a boot-protocol keyboard report
    pub const REPORT_LEN: usize = 8;

    /// Number of key slots in a boot-protocol keyboard report
    pub const KEY_SLOTS: usize = 6;

    /// Report length assumed when a descriptor yields nothing usable
    pub const DEFAULT_REPORT_LEN: usize = 8;

    /// Largest report hidraw will deliver (HID_MAX_BUFFER_SIZE)
    pub const MAX_REPORT_LEN: usize = 16384;

    /// Neutral reports written to a sink when a link stops
    pub const RELEASE_REPORT_COUNT: usize = 3;

    /// Delay between neutral reports, in milliseconds
    pub const RELEASE_REPORT_DELAY_MS: u64 = 1;
}

/// Linux console keymap constants
pub mod keymap {
    /// Number of entries in one console keymap table (NR_KEYS from linux/keyboard.h)
    pub const NR_KEYS: usize = 256;

    /// Start marker of the unshifted table in `loadkeys --mktable` output
    pub const TABLE_START: &str = "plain_map";

    pub const TABLE_END: &str = "};";

    /// Hole value used by the kernel for unassigned keys (K_HOLE)
    pub const K_HOLE: u16 = 0xf200;

    /// Keysym type of plain Latin-1 characters (KT_LATIN)
    pub const KT_LATIN: u8 = 0xf0;

    /// Keysym type of letters affected by CapsLock (KT_LETTER)
    pub const KT_LETTER: u8 = 0xfb;
}

/// Input event constants (from linux/input.h)
pub mod input {
    /// Key code for Tab key - used to identify keyboard devices (from Linux input-event-codes.h)
    pub const KEY_TAB: u16 = 15;

    /// Default pause between releasing and acquiring a grab, in milliseconds
    pub const GRAB_SETTLE_MS: u64 = 5;
}

/// Script sandbox limits
pub mod sandbox {
    /// Upper bound on script operations per load or callback
    pub const MAX_OPERATIONS: u64 = 1_000_000;

    pub const MAX_CALL_LEVELS: usize = 32;

    pub const MAX_EXPR_DEPTH: usize = 64;

    pub const MAX_STRING_SIZE: usize = 4096;

    pub const MAX_ARRAY_SIZE: usize = 1024;

    pub const MAX_MAP_SIZE: usize = 1024;

    /// Pending hotkey lookups buffered between forwarder links and the dispatcher
    pub const DISPATCH_QUEUE: usize = 64;
}
