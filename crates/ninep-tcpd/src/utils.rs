use ninep_ramfs::RamHandle;

/// Seed a small demo tree under `root` so a client has something to walk
/// the moment it attaches: a top-level `hello.txt` and an empty `tmp/`
/// directory, mirroring the scenario fixtures in the core crate's tests.
pub fn seed_demo_tree(fs: &ninep_ramfs::RamFs, root: &RamHandle) {
    let _ = fs.create_file(root, "hello.txt", b"hi\n".to_vec());
    let _ = fs.create_dir(root, "tmp");
}
