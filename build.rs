//! Build script for monet_vr

fn main() {
    // ASensorManager and friends live in libandroid.
    if std::env::var("CARGO_CFG_TARGET_OS").is_ok_and(|os| os == "android") {
        println!("cargo:rustc-link-lib=android");
    }
}
