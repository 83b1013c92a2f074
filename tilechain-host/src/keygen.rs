use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use term_table::row::Row;
use term_table::table_cell::{Alignment as CellAlignment, TableCell};
use term_table::{Table, TableStyle};
use tilechain_client::Identity;
use tilechain_client::config::KeyFiles;
use tracing::{info, warn};

/// Where the identity in use came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityStatus {
    /// Key file was just written
    Created,
    /// Read from a key or mnemonic file
    Loaded,
    /// Generated for this run only, nothing on disk
    Ephemeral,
}

/// Generate an identity and write it to the private key file. An existing
/// file is never replaced.
pub fn keygen(keys: &KeyFiles) -> Result<Identity> {
    let path = &keys.private_key_file;
    let identity = Identity::generate();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            bail!("{} already exists, refusing to overwrite it", path.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to create {}", path.display()));
        }
    };
    writeln!(file, "{}", identity.to_hex())
        .with_context(|| format!("failed to write {}", path.display()))?;

    display_identity_status(IdentityStatus::Created, &identity, path, "-");
    Ok(identity)
}

/// Print the identity banner.
pub fn display_identity_status(
    status: IdentityStatus,
    identity: &Identity,
    key_file: &Path,
    endpoint: &str,
) {
    let mut table = Table::new();
    table.style = TableStyle::extended();

    let (header, use_warn) = match status {
        IdentityStatus::Created => ("✅  Identity Created Successfully ✅", false),
        IdentityStatus::Loaded => ("🔑 IDENTITY LOADED 🔑", false),
        IdentityStatus::Ephemeral => ("⚠️  EPHEMERAL IDENTITY  ⚠️", true),
    };
    table.add_row(Row::new(vec![TableCell::builder(header)
        .col_span(2)
        .alignment(CellAlignment::Center)
        .build()]));

    let public_key = format!("0x{}", hex_prefix(identity.public_key()));
    let key_file = match status {
        IdentityStatus::Ephemeral => "(not saved)".to_string(),
        _ => key_file.display().to_string(),
    };
    for (label, value) in [
        ("Address", identity.address().to_string()),
        ("Public key", public_key),
        ("Key file", key_file),
        ("Endpoint", endpoint.to_owned()),
    ] {
        table.add_row(Row::new(vec![
            TableCell::builder(label)
                .alignment(CellAlignment::Right)
                .build(),
            TableCell::builder(value)
                .alignment(CellAlignment::Left)
                .build(),
        ]));
    }

    if use_warn {
        warn!("\n{}", table.render());
    } else {
        info!("\n{}", table.render());
    }
}

/// First bytes of a public key, enough to tell keys apart in a banner.
fn hex_prefix(key: &[u8; 64]) -> String {
    format!("{}…", hex::encode(&key[..8]))
}
