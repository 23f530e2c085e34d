//! # Seed Data Generator
//!
//! Populates an authoritative store with pharmacy inventory for development.
//!
//! ## Usage
//! ```bash
//! # Generate 500 items (default)
//! cargo run -p rxpos-db --bin seed
//!
//! # Generate custom amount into a specific file
//! cargo run -p rxpos-db --bin seed -- --count 2000 --db ./data/rxpos.db
//! ```
//!
//! Each item gets a SKU of the form `{CLASS}-{DRUG}-{STRENGTH}-{N}`, a batch
//! number, an expiry date 6 to 30 months out and stock between 0 and 120.

use chrono::{Months, Utc};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use rxpos_core::{InventoryRecord, Money};
use rxpos_db::{Database, DbConfig};

/// Therapeutic classes with representative products.
const CLASSES: &[(&str, &[&str])] = &[
    (
        "ANL",
        &["Paracetamol", "Ibuprofen", "Diclofenac", "Aspirin", "Naproxen"],
    ),
    (
        "ABX",
        &[
            "Amoxicillin",
            "Azithromycin",
            "Ciprofloxacin",
            "Metronidazole",
            "Doxycycline",
            "Cefuroxime",
        ],
    ),
    (
        "AMA",
        &["Artemether-Lumefantrine", "Artesunate", "Dihydroartemisinin"],
    ),
    (
        "CVS",
        &["Amlodipine", "Lisinopril", "Losartan", "Atorvastatin", "Hydrochlorothiazide"],
    ),
    ("DIA", &["Metformin", "Glibenclamide", "Gliclazide"]),
    (
        "GIT",
        &["Omeprazole", "Loperamide", "Oral Rehydration Salts", "Metoclopramide"],
    ),
    (
        "RSP",
        &["Cetirizine", "Loratadine", "Salbutamol", "Chlorpheniramine"],
    ),
    ("VIT", &["Vitamin C", "Folic Acid", "Ferrous Sulphate", "Multivitamin"]),
];

/// Strength variants with a price addon in minor units.
const STRENGTHS: &[(&str, i64)] = &[
    ("100mg", 0),
    ("250mg", 150),
    ("500mg", 300),
    ("5mg", 0),
    ("10mg", 100),
    ("20mg", 250),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().collect();

    let mut count: usize = 500;
    let mut db_path = String::from("./rxpos_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(500);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("rxpos seed data generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --count <N>    Number of items to generate (default: 500)");
                println!("  -d, --db <PATH>    Database file path (default: ./rxpos_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(db = %db_path, count, "Seeding inventory");

    let db = Database::new(DbConfig::new(&db_path)).await?;

    let existing = db.inventory().count().await?;
    if existing > 0 {
        warn!(
            existing,
            "Database already has inventory, skipping seed (delete the file to regenerate)"
        );
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut generated = 0;

    'outer: for (class_idx, (class_code, drugs)) in CLASSES.iter().enumerate() {
        for (drug_idx, drug) in drugs.iter().enumerate() {
            for (strength_idx, (strength, addon)) in STRENGTHS.iter().enumerate() {
                for lot in 0..4 {
                    if generated >= count {
                        break 'outer;
                    }
                    let seed = class_idx * 1000 + drug_idx * 100 + strength_idx * 10 + lot;
                    let record = generate_record(class_code, drug, strength, *addon, seed);

                    if let Err(e) = db
                        .inventory()
                        .create(&Uuid::new_v4().to_string(), &record, None)
                        .await
                    {
                        warn!(sku = %record.sku, error = %e, "Failed to insert item");
                        continue;
                    }
                    generated += 1;

                    if generated % 100 == 0 {
                        info!(generated, "Progress");
                    }
                }
            }
        }
    }

    let elapsed = start.elapsed();
    let low = db.inventory().low_stock().await?.len();
    info!(
        generated,
        low_stock = low,
        elapsed_ms = elapsed.as_millis() as u64,
        "Seed complete"
    );

    Ok(())
}

/// Builds one deterministic inventory record.
fn generate_record(
    class: &str,
    drug: &str,
    strength: &str,
    price_addon: i64,
    seed: usize,
) -> InventoryRecord {
    let code: String = drug
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .take(3)
        .collect::<String>()
        .to_uppercase();
    let sku = format!("{}-{}-{}-{:04}", class, code, strength.to_uppercase(), seed);

    // Sell price 1.50 - 9.49 plus strength addon, cost 55-75% of sell
    let sell = 150 + ((seed * 37) % 800) as i64 + price_addon;
    let cost = sell * (55 + (seed % 21) as i64) / 100;

    let expiry = Utc::now()
        .date_naive()
        .checked_add_months(Months::new(6 + (seed % 25) as u32));

    InventoryRecord {
        name: format!("{} {}", drug, strength),
        sku,
        quantity: (seed % 121) as i64,
        reorder_level: 10 + (seed % 3) as i64 * 5,
        cost_price: Money::from_minor(cost),
        sell_price: Money::from_minor(sell),
        batch_number: Some(format!("LOT{:06}", seed * 7 + 13)),
        expiry_date: expiry,
    }
}
