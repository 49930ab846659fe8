//! Random item generation for starting inventories.

use rand::Rng;
use shared::{Inventory, Item, ItemKind};

pub const MIN_ITEM_LEVEL: u32 = 1;
pub const MAX_ITEM_LEVEL: u32 = 100;

const WEAPON_NAMES: [&str; 4] = ["Wand", "Staff", "Rod", "Sceptre"];
const ARMOR_NAMES: [&str; 3] = ["Robe", "Cloak", "Mantle"];
const TRINKET_NAMES: [&str; 3] = ["Ring", "Amulet", "Charm"];

pub fn random_item<R: Rng>(rng: &mut R, level: u32) -> Item {
    let (kind, names): (ItemKind, &[&str]) = match rng.gen_range(0..3) {
        0 => (ItemKind::Weapon, &WEAPON_NAMES),
        1 => (ItemKind::Armor, &ARMOR_NAMES),
        _ => (ItemKind::Trinket, &TRINKET_NAMES),
    };
    let name = names[rng.gen_range(0..names.len())];

    Item {
        name: format!("{} (lv {})", name, level),
        kind,
        level,
    }
}

/// An inventory of `count` random items with levels across the full range.
pub fn starting_inventory<R: Rng>(rng: &mut R, count: usize) -> Inventory {
    let mut inventory = Inventory::default();
    for _ in 0..count {
        let level = rng.gen_range(MIN_ITEM_LEVEL..=MAX_ITEM_LEVEL);
        inventory.add(random_item(rng, level));
    }
    inventory
}
