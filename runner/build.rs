use std::fs::create_dir_all;
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::{env, io};

/// Packages the kernel (or, under the `kernel_test` feature, the test
/// harness binary) into a bootable Limine ISO and exports its path as the
/// `ISO` env var `runner/src/main.rs` hands straight to QEMU's `-cdrom`.
fn main() {
    check_command_exists("xorriso");
    check_command_exists("limine");

    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let runner_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let limine_dir = match env::var("LIMINE_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => panic!(
            "LIMINE_PATH environment variable not set. Please set it to the Limine directory."
        ),
    };

    let iso_dir = out_dir.join("iso_root");
    create_dir_all(&iso_dir).unwrap();

    let limine_conf = iso_dir.join("limine.conf");
    ensure_symlink(runner_dir.join("limine.conf"), limine_conf).unwrap();

    let boot_dir = iso_dir.join("boot");
    create_dir_all(&boot_dir).unwrap();

    // `kernel_test` swaps in the test crate's boot binary, which runs
    // `tests::run_tests()` instead of the kernel's normal master loop.
    let kernel_executable_file = if env::var("CARGO_FEATURE_KERNEL_TEST").is_ok() {
        env::var("CARGO_BIN_FILE_TESTS").expect("tests bin not built")
    } else {
        env::var("CARGO_BIN_FILE_KERNEL").expect("kernel bin not built")
    };
    ensure_symlink(&kernel_executable_file, iso_dir.join("kernel")).unwrap();

    let out_limine_dir = boot_dir.join("limine");
    create_dir_all(&out_limine_dir).unwrap();
    for path in [
        "limine-bios.sys",
        "limine-bios-cd.bin",
        "limine-uefi-cd.bin",
    ] {
        let from = limine_dir.join(path);
        let to = out_limine_dir.join(path);
        ensure_symlink(from, to).unwrap();
    }

    let efi_boot_dir = iso_dir.join("EFI/BOOT");
    create_dir_all(&efi_boot_dir).unwrap();
    for efi_file in ["BOOTX64.EFI", "BOOTIA32.EFI"] {
        ensure_symlink(limine_dir.join(efi_file), efi_boot_dir.join(efi_file)).unwrap();
    }

    ensure_symlink(&out_dir, runner_dir.join("out_dir")).unwrap();

    let output_iso = out_dir.join("os.iso");
    let status = std::process::Command::new("xorriso")
        .arg("-as")
        .arg("mkisofs")
        .arg("--follow-links")
        .arg("-b")
        .arg(
            out_limine_dir
                .join("limine-bios-cd.bin")
                .strip_prefix(&iso_dir)
                .unwrap(),
        )
        .arg("-no-emul-boot")
        .arg("-boot-load-size")
        .arg("4")
        .arg("-boot-info-table")
        .arg("--efi-boot")
        .arg(
            out_limine_dir
                .join("limine-uefi-cd.bin")
                .strip_prefix(&iso_dir)
                .unwrap(),
        )
        .arg("-efi-boot-part")
        .arg("--efi-boot-image")
        .arg("--protective-msdos-label")
        .arg(&iso_dir)
        .arg("-o")
        .arg(&output_iso)
        .stderr(Stdio::inherit())
        .stdout(Stdio::inherit())
        .status()
        .unwrap();
    assert!(status.success());

    // Hybrid BIOS/UEFI boot record; see
    // https://github.com/limine-bootloader/limine/blob/v9.x/USAGE.md#biosuefi-hybrid-iso-creation
    let status = std::process::Command::new("limine")
        .arg("bios-install")
        .arg(&output_iso)
        .stderr(Stdio::inherit())
        .stdout(Stdio::inherit())
        .status()
        .unwrap();
    assert!(status.success());

    println!("cargo:rustc-env=ISO={}", output_iso.display());
}

pub fn ensure_symlink<P: AsRef<Path>, Q: AsRef<Path>>(original: P, link: Q) -> io::Result<()> {
    match std::fs::remove_file(&link) {
        Ok(()) => Ok(()),
        Err(error) => match error.kind() {
            ErrorKind::NotFound => Ok(()),
            _ => Err(error),
        },
    }?;
    symlink(original, link)?;
    Ok(())
}

fn check_command_exists(cmd: &str) {
    if std::process::Command::new(cmd)
        .arg("--version")
        .output()
        .is_err()
    {
        panic!("Command '{}' not found. Please install it.", cmd);
    }
}
