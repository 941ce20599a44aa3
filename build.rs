fn main() {
    // Rebuild when any of the embedded WGSL shaders change
    println!("cargo:rerun-if-changed=shaders/strand.wgsl");
    println!("cargo:rerun-if-changed=shaders/ppll_clear.wgsl");
    println!("cargo:rerun-if-changed=shaders/ppll_resolve.wgsl");
    println!("cargo:rerun-if-changed=shaders/mesh.wgsl");
    println!("cargo:rerun-if-changed=shaders/shadow.wgsl");
    println!("cargo:rerun-if-changed=shaders/raymarch.wgsl");
    println!("cargo:rerun-if-changed=shaders/blit.wgsl");
}
