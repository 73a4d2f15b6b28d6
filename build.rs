use std::{env::var, fs, path::PathBuf};

pub fn main() {
    println!("cargo:rerun-if-changed=src/");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=cbindgen.toml");
    println!("cargo:rerun-if-env-changed=MIRSDR_LIB_DIR");

    // the sim backend needs neither the vendor library nor a header
    if var("CARGO_FEATURE_MIRSDR").is_err() {
        return;
    }

    let crate_dir = var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR not set");
    let include_dir = PathBuf::from(&crate_dir).join("include");
    if !include_dir.exists() {
        fs::create_dir_all(&include_dir).expect("Failed to create include directory");
    }

    let header_path = include_dir.join("rtlsdr_rsp.h");
    let config = cbindgen::Config::from_file(PathBuf::from(&crate_dir).join("cbindgen.toml"))
        .expect("invalid cbindgen.toml");

    cbindgen::Builder::new()
        .with_crate(&crate_dir)
        .with_config(config)
        .generate()
        .expect("Unable to generate C header")
        .write_to_file(header_path);

    if let Ok(dir) = var("MIRSDR_LIB_DIR") {
        println!("cargo:rustc-link-search={}", dir);
    }
    println!("cargo:rustc-link-search=/usr/local/lib");
    println!("cargo:rustc-link-lib=mirsdr_api");
}
