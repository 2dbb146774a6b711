//! Synthetic device catalog
//!
//! Generates the node's allocatable devices once at startup. Identifiers are drawn from
//! a PRNG seeded with a hash of the node name, so a restarted agent (or a second
//! instance on the same node) publishes exactly the same inventory.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use rand::RngCore;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

const DRIVER_VERSION: &str = "1.0.0";
const CONSUMABLE_MINIMUM: &str = "1";

/// Number of devices to generate per category
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogConfig {
    pub num_devices: usize,
    pub num_shared_devices: usize,
    pub num_shared_devices_with_consumable: usize,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            num_devices: 8,
            num_shared_devices: 1,
            num_shared_devices_with_consumable: 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceCategory {
    /// whole devices, one consumer at a time
    Exclusive,
    Shared,
    /// shared, with capacity handed out in minimum units
    SharedConsumable,
}

impl DeviceCategory {
    const ALL: [DeviceCategory; 3] = [Self::Exclusive, Self::Shared, Self::SharedConsumable];

    fn prefix(self) -> &'static str {
        match self {
            Self::Exclusive => "gpu-",
            Self::Shared => "nic-",
            Self::SharedConsumable => "qos-nic-",
        }
    }

    fn capacity_name(self) -> &'static str {
        match self {
            Self::Exclusive => "memory",
            Self::Shared | Self::SharedConsumable => "bandwidth",
        }
    }

    fn capacity_value(self) -> &'static str {
        match self {
            Self::Exclusive => "80Gi",
            Self::Shared | Self::SharedConsumable => "10Gi",
        }
    }

    fn model(self) -> &'static str {
        match self {
            Self::Exclusive => "LATEST-GPU-MODEL",
            Self::Shared => "LATEST-NIC-MODEL",
            Self::SharedConsumable => "LATEST-QOS-NIC-MODEL",
        }
    }

    fn shared(self) -> bool {
        !matches!(self, Self::Exclusive)
    }

    fn consumable(self) -> bool {
        matches!(self, Self::SharedConsumable)
    }

    fn count(self, config: &CatalogConfig) -> usize {
        match self {
            Self::Exclusive => config.num_devices,
            Self::Shared => config.num_shared_devices,
            Self::SharedConsumable => config.num_shared_devices_with_consumable,
        }
    }
}

/// An allocatable device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub basic: BasicDevice,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BasicDevice {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, DeviceAttribute>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capacity: BTreeMap<String, DeviceCapacity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
}

/// Typed attribute value; exactly one field is set
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceAttribute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub int: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bool: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl DeviceAttribute {
    fn int(value: i64) -> Self {
        Self {
            int: Some(value),
            ..Default::default()
        }
    }

    fn string(value: impl Into<String>) -> Self {
        Self {
            string: Some(value.into()),
            ..Default::default()
        }
    }

    fn version(value: impl Into<String>) -> Self {
        Self {
            version: Some(value.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCapacity {
    pub value: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_policy: Option<CapacityClaimPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityClaimPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<CapacityClaimPolicyRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityClaimPolicyRange {
    pub minimum: Quantity,
}

/// Resources published to the allocation subsystem
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverResources {
    pub pools: BTreeMap<String, Pool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pool {
    pub slices: Vec<Slice>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Slice {
    pub devices: Vec<Device>,
}

/// Immutable inventory of the node's allocatable devices, keyed by device name
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCatalog {
    allocatable: BTreeMap<String, Device>,
}

impl DeviceCatalog {
    /// Generate the catalog for `seed` (the node name).
    pub fn build(seed: &str, config: &CatalogConfig) -> Self {
        let mut allocatable = BTreeMap::new();

        for category in DeviceCategory::ALL {
            let uuids = generate_uuids(category.prefix(), seed, category.count(config));
            for (index, uuid) in uuids.into_iter().enumerate() {
                let device = generate_device(category, index, uuid);
                allocatable.insert(device.name.clone(), device);
            }
        }

        info!(
            seed = seed,
            devices = allocatable.len(),
            "device catalog generated"
        );

        Self { allocatable }
    }

    pub fn is_allocatable(&self, device_name: &str) -> bool {
        self.allocatable.contains_key(device_name)
    }

    /// Snapshot of every device, ordered by name.
    pub fn list(&self) -> Vec<Device> {
        self.allocatable.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.allocatable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocatable.is_empty()
    }

    /// Group all devices into a single pool with one slice.
    pub fn driver_resources(&self, pool_name: &str) -> DriverResources {
        let pool = Pool {
            slices: vec![Slice {
                devices: self.list(),
            }],
        };

        DriverResources {
            pools: BTreeMap::from([(pool_name.to_string(), pool)]),
        }
    }
}

fn generate_device(category: DeviceCategory, index: usize, uuid: String) -> Device {
    let claim_policy = category.consumable().then(|| CapacityClaimPolicy {
        range: Some(CapacityClaimPolicyRange {
            minimum: Quantity(CONSUMABLE_MINIMUM.to_string()),
        }),
    });

    let capacity = DeviceCapacity {
        value: Quantity(category.capacity_value().to_string()),
        claim_policy,
    };

    let attributes = BTreeMap::from([
        ("index".to_string(), DeviceAttribute::int(index as i64)),
        ("uuid".to_string(), DeviceAttribute::string(uuid)),
        ("model".to_string(), DeviceAttribute::string(category.model())),
        (
            "driverVersion".to_string(),
            DeviceAttribute::version(DRIVER_VERSION),
        ),
    ]);

    Device {
        name: format!("{}{index}", category.prefix()),
        basic: BasicDevice {
            attributes,
            capacity: BTreeMap::from([(category.capacity_name().to_string(), capacity)]),
            shared: category.shared().then_some(true),
        },
    }
}

/// Draw `count` 16-byte identifiers from a generator seeded by `seed`.
fn generate_uuids(prefix: &str, seed: &str, count: usize) -> Vec<String> {
    let mut rng = ChaCha8Rng::seed_from_u64(hash_seed(seed) as u64);

    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 16];
            rng.fill_bytes(&mut bytes);
            format!("{prefix}{}", Uuid::from_bytes(bytes).hyphenated())
        })
        .collect()
}

/// `h = 31 * h + c` over the code points of `s`, wrapping on overflow.
fn hash_seed(s: &str) -> i64 {
    s.chars()
        .fold(0i64, |h, c| h.wrapping_mul(31).wrapping_add(c as i64))
}
