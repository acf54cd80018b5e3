// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn global_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .env("CASKADE_DB")
            .global(true)
            .help("Registry database path"),
    )
    .arg(
        Arg::new("manifests")
            .short('m')
            .long("manifests")
            .value_name("DIR")
            .env("CASKADE_MANIFESTS")
            .global(true)
            .help("Directory of *.json package manifests"),
    )
    .arg(
        Arg::new("prefix")
            .short('p')
            .long("prefix")
            .value_name("DIR")
            .env("CASKADE_PREFIX")
            .global(true)
            .help("Install prefix holding bin/ and Applications/"),
    )
    .arg(
        Arg::new("cache_dir")
            .long("cache-dir")
            .value_name("DIR")
            .env("CASKADE_CACHE")
            .global(true)
            .help("Verified artifact cache"),
    )
    .arg(
        Arg::new("platform")
            .long("platform")
            .value_name("OS/ARCH[@VERSION]")
            .env("CASKADE_PLATFORM")
            .global(true)
            .help("Target platform instead of the host, e.g. darwin/arm64@14.2"),
    )
    .arg(
        Arg::new("zap_policy")
            .long("zap-policy")
            .value_parser(["preserve", "supersede"])
            .env("CASKADE_ZAP_POLICY")
            .global(true)
            .help("What upgrades do with zap paths the new version drops"),
    )
    .arg(
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .action(ArgAction::SetTrue)
            .global(true)
            .help("Enable debug logging"),
    )
}

fn build_cli() -> Command {
    let cmd = Command::new("caskade")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Caskade Contributors")
        .about("Manifest-driven package installer with verified, idempotent installs")
        .subcommand_required(false);

    global_args(cmd)
        .subcommand(Command::new("init").about("Initialize the registry database and manifest directory"))
        .subcommand(
            Command::new("install")
                .about("Install one or more packages")
                .arg(
                    Arg::new("names")
                        .required(true)
                        .num_args(1..)
                        .help("Package names"),
                )
                .arg(
                    Arg::new("version")
                        .long("version")
                        .help("Version or requirement (e.g. 2.29.5, ^2.29) applied to every name"),
                ),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Remove an installed package")
                .arg(Arg::new("name").required(true).help("Package name to remove"))
                .arg(
                    Arg::new("zap")
                        .long("zap")
                        .action(ArgAction::SetTrue)
                        .help("Also remove user data and caches the package declares"),
                ),
        )
        .subcommand(
            Command::new("upgrade")
                .about("Upgrade an installed package to its newest manifest version")
                .arg(Arg::new("name").required(true).help("Package name to upgrade")),
        )
        .subcommand(Command::new("list").about("List installed packages"))
        .subcommand(
            Command::new("info")
                .about("Show manifest and install details for a package")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(Command::new("outdated").about("List installed packages with newer manifests"))
        .subcommand(
            Command::new("history")
                .about("Show changeset history")
                .arg(Arg::new("name").help("Only changesets for this package")),
        )
        .subcommand(
            Command::new("test")
                .about("Run an installed package's smoke tests")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("caskade.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
