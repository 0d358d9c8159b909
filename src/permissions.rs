//! Runtime permission requirements for BLE central operations.
//!
//! The manager never prompts for permissions. Callers enumerate what the
//! current platform needs with [`required_permissions`], obtain the grants
//! through their own UI flow, and expose the result via [`PermissionStatus`].

use std::collections::HashSet;
use std::fmt;

/// A platform permission identifier relevant to BLE scanning and connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Permission {
    /// Legacy Bluetooth permission (Android < 12).
    Bluetooth,
    /// Legacy Bluetooth admin permission (Android < 12).
    BluetoothAdmin,
    /// Scan permission (Android 12+).
    BluetoothScan,
    /// Connect permission (Android 12+).
    BluetoothConnect,
    /// Fine location, required for BLE scan results on Android.
    AccessFineLocation,
}

impl Permission {
    /// The platform identifier string for this permission.
    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Bluetooth => "android.permission.BLUETOOTH",
            Self::BluetoothAdmin => "android.permission.BLUETOOTH_ADMIN",
            Self::BluetoothScan => "android.permission.BLUETOOTH_SCAN",
            Self::BluetoothConnect => "android.permission.BLUETOOTH_CONNECT",
            Self::AccessFineLocation => "android.permission.ACCESS_FINE_LOCATION",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

/// The platform the manager is running on, as far as permissions go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Platform {
    /// Android at the given API level.
    Android {
        /// `Build.VERSION.SDK_INT`.
        api_level: u32,
    },
    /// Desktop hosts (Linux/BlueZ, macOS, Windows) with no runtime permission model.
    #[default]
    Desktop,
}

impl Platform {
    /// First Android API level with the split scan/connect permissions.
    pub const ANDROID_S: u32 = 31;
}

const PERMISSIONS_PRE_S: &[Permission] = &[
    Permission::Bluetooth,
    Permission::BluetoothAdmin,
    Permission::AccessFineLocation,
];

const PERMISSIONS_S_PLUS: &[Permission] = &[
    Permission::BluetoothScan,
    Permission::BluetoothConnect,
    Permission::AccessFineLocation,
];

/// Permissions that must be granted before scanning on `platform`.
pub fn required_permissions(platform: Platform) -> &'static [Permission] {
    match platform {
        Platform::Android { api_level } if api_level >= Platform::ANDROID_S => PERMISSIONS_S_PLUS,
        Platform::Android { .. } => PERMISSIONS_PRE_S,
        Platform::Desktop => &[],
    }
}

/// Check whether `granted` satisfies every permission in `required`.
pub fn has_all_permissions(required: &[Permission], granted: &HashSet<Permission>) -> bool {
    required.iter().all(|p| granted.contains(p))
}

/// The subset of `required` not present in `granted`, in `required` order.
pub fn missing_permissions(
    required: &[Permission],
    granted: &HashSet<Permission>,
) -> Vec<Permission> {
    required
        .iter()
        .filter(|p| !granted.contains(p))
        .copied()
        .collect()
}

/// Source of the current grant state, supplied by the host application.
pub trait PermissionStatus: Send {
    /// The set of permissions currently granted.
    fn granted(&self) -> HashSet<Permission>;
}

impl PermissionStatus for HashSet<Permission> {
    fn granted(&self) -> HashSet<Permission> {
        self.clone()
    }
}

impl<F> PermissionStatus for F
where
    F: Fn() -> HashSet<Permission> + Send,
{
    fn granted(&self) -> HashSet<Permission> {
        self()
    }
}

/// Grants everything; for hosts without a permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllGranted;

impl PermissionStatus for AllGranted {
    fn granted(&self) -> HashSet<Permission> {
        PERMISSIONS_PRE_S
            .iter()
            .chain(PERMISSIONS_S_PLUS)
            .copied()
            .collect()
    }
}
