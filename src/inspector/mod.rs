//! RPM header inspector.
//!
//! Derives a full [`Package`] descriptor from an RPM binary: identity and
//! text fields, dependency relations with comparator flags, the file list,
//! and changelogs.

mod header;

use crate::checksum::{compute_checksum, ChecksumAlgorithm};
use crate::error::Result;
use crate::metadata::model::{Changelog, FileEntry, Package, Relation};

// RPM header tags
const RPMTAG_NAME: u32 = 1000;
const RPMTAG_VERSION: u32 = 1001;
const RPMTAG_RELEASE: u32 = 1002;
const RPMTAG_EPOCH: u32 = 1003;
const RPMTAG_SUMMARY: u32 = 1004;
const RPMTAG_DESCRIPTION: u32 = 1005;
const RPMTAG_BUILDTIME: u32 = 1006;
const RPMTAG_BUILDHOST: u32 = 1007;
const RPMTAG_SIZE: u32 = 1009;
const RPMTAG_VENDOR: u32 = 1011;
const RPMTAG_LICENSE: u32 = 1014;
const RPMTAG_PACKAGER: u32 = 1015;
const RPMTAG_GROUP: u32 = 1016;
const RPMTAG_URL: u32 = 1020;
const RPMTAG_ARCH: u32 = 1022;
const RPMTAG_OLDFILENAMES: u32 = 1027;
const RPMTAG_FILEMODES: u32 = 1030;
const RPMTAG_FILEFLAGS: u32 = 1037;
const RPMTAG_SOURCERPM: u32 = 1044;
const RPMTAG_ARCHIVESIZE: u32 = 1046;
const RPMTAG_PROVIDENAME: u32 = 1047;
const RPMTAG_REQUIREFLAGS: u32 = 1048;
const RPMTAG_REQUIRENAME: u32 = 1049;
const RPMTAG_REQUIREVERSION: u32 = 1050;
const RPMTAG_CONFLICTFLAGS: u32 = 1053;
const RPMTAG_CONFLICTNAME: u32 = 1054;
const RPMTAG_CONFLICTVERSION: u32 = 1055;
const RPMTAG_CHANGELOGTIME: u32 = 1080;
const RPMTAG_CHANGELOGNAME: u32 = 1081;
const RPMTAG_CHANGELOGTEXT: u32 = 1082;
const RPMTAG_OBSOLETENAME: u32 = 1090;
const RPMTAG_PROVIDEFLAGS: u32 = 1112;
const RPMTAG_PROVIDEVERSION: u32 = 1113;
const RPMTAG_OBSOLETEFLAGS: u32 = 1114;
const RPMTAG_OBSOLETEVERSION: u32 = 1115;
const RPMTAG_BASENAMES: u32 = 1117;
const RPMTAG_DIRNAMES: u32 = 1118;
const RPMTAG_DIRINDEXES: u32 = 1116;

// dependency sense bits
const DEP_FLAG_LESSER: u32 = 1 << 1;
const DEP_FLAG_GREATER: u32 = 1 << 2;
const DEP_FLAG_EQUAL: u32 = 1 << 3;
const DEP_FLAG_PREREQ: u32 = 1 << 6;
const DEP_FLAG_LESSER_OR_EQUAL: u32 = DEP_FLAG_LESSER | DEP_FLAG_EQUAL;
const DEP_FLAG_GREATER_OR_EQUAL: u32 = DEP_FLAG_GREATER | DEP_FLAG_EQUAL;

// file flag bits
const FILE_FLAG_GHOST: u32 = 1 << 6;

// S_IFMT / S_IFDIR of the file mode
const MODE_MASK: u16 = 0o170000;
const MODE_DIR: u16 = 0o040000;

/// Parse an RPM binary and build the descriptor recorded in repository
/// metadata. `file_time` and `file_size` describe the on-disk file;
/// `dest_rel` becomes the descriptor's location; `pkgid` is the digest of
/// `data` under `alg`.
pub fn inspect_rpm(
    data: &[u8],
    file_time: i64,
    file_size: u64,
    alg: ChecksumAlgorithm,
    dest_rel: &str,
) -> Result<Package> {
    let rpm = header::parse_rpm(data)?;
    let h = &rpm.header;
    let pkgid = compute_checksum(data, alg);

    let get = |tag| h.get_string(tag).unwrap_or_default();

    Ok(Package {
        name: get(RPMTAG_NAME),
        arch: get(RPMTAG_ARCH),
        epoch: h.get_u32(RPMTAG_EPOCH).unwrap_or(0),
        version: get(RPMTAG_VERSION),
        release: get(RPMTAG_RELEASE),
        summary: get(RPMTAG_SUMMARY),
        description: get(RPMTAG_DESCRIPTION),
        license: get(RPMTAG_LICENSE),
        vendor: get(RPMTAG_VENDOR),
        group: get(RPMTAG_GROUP),
        build_host: get(RPMTAG_BUILDHOST),
        source_rpm: get(RPMTAG_SOURCERPM),
        url: get(RPMTAG_URL),
        packager: get(RPMTAG_PACKAGER),
        time_build: h.get_u32(RPMTAG_BUILDTIME).unwrap_or(0) as i64,
        time_file: file_time,
        size_package: file_size,
        size_installed: h.get_u64(RPMTAG_SIZE).unwrap_or(0),
        size_archive: h.get_u64(RPMTAG_ARCHIVESIZE).unwrap_or(0),
        location: dest_rel.to_string(),
        pkgid,
        checksum_type: alg.as_str().to_string(),
        header_start: rpm.header_start,
        header_end: rpm.header_end,
        provides: relations(h, RPMTAG_PROVIDENAME, RPMTAG_PROVIDEFLAGS, RPMTAG_PROVIDEVERSION),
        requires: relations(h, RPMTAG_REQUIRENAME, RPMTAG_REQUIREFLAGS, RPMTAG_REQUIREVERSION),
        conflicts: relations(h, RPMTAG_CONFLICTNAME, RPMTAG_CONFLICTFLAGS, RPMTAG_CONFLICTVERSION),
        obsoletes: relations(h, RPMTAG_OBSOLETENAME, RPMTAG_OBSOLETEFLAGS, RPMTAG_OBSOLETEVERSION),
        files: files(h),
        changelogs: changelogs(h),
    })
}

fn relations(h: &header::Header, name_tag: u32, flags_tag: u32, version_tag: u32) -> Vec<Relation> {
    let names = h.get_string_array(name_tag);
    let flags = h.get_u32_array(flags_tag);
    let versions = h.get_string_array(version_tag);

    names
        .into_iter()
        .enumerate()
        .map(|(i, name)| {
            let flag_bits = flags.get(i).copied().unwrap_or(0);
            let (flags_str, pre) = dep_flags(flag_bits);
            let (epoch, version, release) =
                parse_evr(versions.get(i).map(String::as_str).unwrap_or(""));
            Relation {
                name,
                flags: flags_str.to_string(),
                epoch,
                version,
                release,
                pre,
            }
        })
        .collect()
}

/// Map dependency sense bits to a single comparator token, checking combined
/// senses before simple ones, and report the pre-requisite bit separately.
fn dep_flags(flags: u32) -> (&'static str, bool) {
    let pre = flags & DEP_FLAG_PREREQ != 0;
    let token = if flags & DEP_FLAG_LESSER_OR_EQUAL == DEP_FLAG_LESSER_OR_EQUAL {
        "LE"
    } else if flags & DEP_FLAG_GREATER_OR_EQUAL == DEP_FLAG_GREATER_OR_EQUAL {
        "GE"
    } else if flags & DEP_FLAG_LESSER == DEP_FLAG_LESSER {
        "LT"
    } else if flags & DEP_FLAG_GREATER == DEP_FLAG_GREATER {
        "GT"
    } else if flags & DEP_FLAG_EQUAL == DEP_FLAG_EQUAL {
        "EQ"
    } else {
        ""
    };
    (token, pre)
}

/// Split an `[epoch:]version[-release]` string.
fn parse_evr(evr: &str) -> (u32, String, String) {
    let (epoch, rest) = match evr.split_once(':') {
        Some((e, rest)) => (e.parse().unwrap_or(0), rest),
        None => (0, evr),
    };
    match rest.split_once('-') {
        Some((ver, rel)) => (epoch, ver.to_string(), rel.to_string()),
        None => (epoch, rest.to_string(), String::new()),
    }
}

fn files(h: &header::Header) -> Vec<FileEntry> {
    let basenames = h.get_string_array(RPMTAG_BASENAMES);
    let paths: Vec<String> = if basenames.is_empty() {
        h.get_string_array(RPMTAG_OLDFILENAMES)
    } else {
        let dirnames = h.get_string_array(RPMTAG_DIRNAMES);
        let dirindexes = h.get_u32_array(RPMTAG_DIRINDEXES);
        basenames
            .iter()
            .enumerate()
            .map(|(i, base)| {
                let dir = dirindexes
                    .get(i)
                    .and_then(|&di| dirnames.get(di as usize))
                    .map(String::as_str)
                    .unwrap_or("");
                format!("{}{}", dir, base)
            })
            .collect()
    };

    let flags = h.get_u32_array(RPMTAG_FILEFLAGS);
    let modes = h.get_u16_array(RPMTAG_FILEMODES);
    paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| {
            let kind = if flags.get(i).copied().unwrap_or(0) & FILE_FLAG_GHOST != 0 {
                "ghost"
            } else if modes.get(i).copied().unwrap_or(0) & MODE_MASK == MODE_DIR {
                "dir"
            } else {
                ""
            };
            FileEntry {
                path,
                kind: kind.to_string(),
            }
        })
        .collect()
}

/// Changelog tag triple; the shortest list bounds the emitted count.
fn changelogs(h: &header::Header) -> Vec<Changelog> {
    let times = h.get_u32_array(RPMTAG_CHANGELOGTIME);
    let authors = h.get_string_array(RPMTAG_CHANGELOGNAME);
    let texts = h.get_string_array(RPMTAG_CHANGELOGTEXT);
    let n = times.len().min(authors.len()).min(texts.len());

    (0..n)
        .map(|i| Changelog {
            author: authors[i].clone(),
            date: times[i] as i64,
            text: texts[i].clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::rpm::{build_rpm, HeaderEntry};

    fn full_rpm() -> Vec<u8> {
        build_rpm(&[
            HeaderEntry::string(RPMTAG_NAME, "nginx"),
            HeaderEntry::string(RPMTAG_VERSION, "1.24.0"),
            HeaderEntry::string(RPMTAG_RELEASE, "1.el9"),
            HeaderEntry::int32(RPMTAG_EPOCH, &[2]),
            HeaderEntry::string(RPMTAG_ARCH, "x86_64"),
            HeaderEntry::string(RPMTAG_SUMMARY, "A web server"),
            HeaderEntry::string(RPMTAG_DESCRIPTION, "Long description"),
            HeaderEntry::int32(RPMTAG_BUILDTIME, &[1_700_000_000]),
            HeaderEntry::string(RPMTAG_BUILDHOST, "builder01"),
            HeaderEntry::int32(RPMTAG_SIZE, &[10240]),
            HeaderEntry::string(RPMTAG_VENDOR, "Example"),
            HeaderEntry::string(RPMTAG_LICENSE, "BSD"),
            HeaderEntry::string(RPMTAG_PACKAGER, "pkg@example.com"),
            HeaderEntry::string(RPMTAG_GROUP, "Daemons"),
            HeaderEntry::string(RPMTAG_URL, "https://nginx.org"),
            HeaderEntry::string(RPMTAG_SOURCERPM, "nginx-1.24.0-1.el9.src.rpm"),
            HeaderEntry::int32(RPMTAG_ARCHIVESIZE, &[8192]),
            HeaderEntry::string_array(RPMTAG_PROVIDENAME, &["nginx", "webserver"]),
            HeaderEntry::int32(RPMTAG_PROVIDEFLAGS, &[DEP_FLAG_EQUAL, 0]),
            HeaderEntry::string_array(RPMTAG_PROVIDEVERSION, &["2:1.24.0-1.el9", ""]),
            HeaderEntry::string_array(RPMTAG_REQUIRENAME, &["libc.so.6", "openssl-libs"]),
            HeaderEntry::int32(
                RPMTAG_REQUIREFLAGS,
                &[0, DEP_FLAG_GREATER_OR_EQUAL | DEP_FLAG_PREREQ],
            ),
            HeaderEntry::string_array(RPMTAG_REQUIREVERSION, &["", "3.0"]),
            HeaderEntry::string_array(RPMTAG_BASENAMES, &["nginx", "nginx", "access.log"]),
            HeaderEntry::string_array(
                RPMTAG_DIRNAMES,
                &["/usr/sbin/", "/etc/", "/var/log/nginx/"],
            ),
            HeaderEntry::int32(RPMTAG_DIRINDEXES, &[0, 1, 2]),
            HeaderEntry::int32(RPMTAG_FILEFLAGS, &[0, 0, FILE_FLAG_GHOST]),
            HeaderEntry::int16(RPMTAG_FILEMODES, &[0o100755, 0o040755, 0o100644]),
            HeaderEntry::int32(RPMTAG_CHANGELOGTIME, &[1_699_000_000, 1_698_000_000]),
            HeaderEntry::string_array(
                RPMTAG_CHANGELOGNAME,
                &["Dev One <one@example.com>", "Dev Two <two@example.com>"],
            ),
            HeaderEntry::string_array(RPMTAG_CHANGELOGTEXT, &["- update", "- initial"]),
        ])
    }

    #[test]
    fn test_inspect_full_descriptor() {
        let data = full_rpm();
        let pkg = inspect_rpm(
            &data,
            1_700_000_100,
            data.len() as u64,
            ChecksumAlgorithm::Sha256,
            "pkgs/nginx-1.24.0-1.el9.x86_64.rpm",
        )
        .unwrap();

        assert_eq!(pkg.name, "nginx");
        assert_eq!(pkg.epoch, 2);
        assert_eq!(pkg.version, "1.24.0");
        assert_eq!(pkg.release, "1.el9");
        assert_eq!(pkg.arch, "x86_64");
        assert_eq!(pkg.nevra(), "nginx-2:1.24.0-1.el9.x86_64");
        assert_eq!(pkg.summary, "A web server");
        assert_eq!(pkg.build_host, "builder01");
        assert_eq!(pkg.time_build, 1_700_000_000);
        assert_eq!(pkg.time_file, 1_700_000_100);
        assert_eq!(pkg.size_package, data.len() as u64);
        assert_eq!(pkg.size_installed, 10240);
        assert_eq!(pkg.size_archive, 8192);
        assert_eq!(pkg.location, "pkgs/nginx-1.24.0-1.el9.x86_64.rpm");
        assert_eq!(
            pkg.pkgid,
            compute_checksum(&data, ChecksumAlgorithm::Sha256)
        );
        assert_eq!(pkg.checksum_type, "sha256");
        assert_eq!(pkg.header_start, 112);
        assert_eq!(pkg.header_end, (data.len() - 7) as u64);

        assert_eq!(pkg.provides.len(), 2);
        assert_eq!(pkg.provides[0].name, "nginx");
        assert_eq!(pkg.provides[0].flags, "EQ");
        assert_eq!(pkg.provides[0].epoch, 2);
        assert_eq!(pkg.provides[0].version, "1.24.0");
        assert_eq!(pkg.provides[0].release, "1.el9");
        assert_eq!(pkg.provides[1].flags, "");

        assert_eq!(pkg.requires.len(), 2);
        assert!(!pkg.requires[0].pre);
        assert_eq!(pkg.requires[1].flags, "GE");
        assert!(pkg.requires[1].pre);
        assert_eq!(pkg.requires[1].version, "3.0");
        assert_eq!(pkg.requires[1].release, "");

        assert_eq!(pkg.files.len(), 3);
        assert_eq!(pkg.files[0].path, "/usr/sbin/nginx");
        assert_eq!(pkg.files[0].kind, "");
        assert_eq!(pkg.files[1].path, "/etc/nginx");
        assert_eq!(pkg.files[1].kind, "dir");
        assert_eq!(pkg.files[2].path, "/var/log/nginx/access.log");
        assert_eq!(pkg.files[2].kind, "ghost");

        assert_eq!(pkg.changelogs.len(), 2);
        assert_eq!(pkg.changelogs[0].author, "Dev One <one@example.com>");
        assert_eq!(pkg.changelogs[0].date, 1_699_000_000);
        assert_eq!(pkg.changelogs[0].text, "- update");
    }

    #[test]
    fn test_dep_flag_priority() {
        assert_eq!(dep_flags(DEP_FLAG_LESSER_OR_EQUAL), ("LE", false));
        assert_eq!(dep_flags(DEP_FLAG_GREATER_OR_EQUAL), ("GE", false));
        assert_eq!(dep_flags(DEP_FLAG_LESSER), ("LT", false));
        assert_eq!(dep_flags(DEP_FLAG_GREATER), ("GT", false));
        assert_eq!(dep_flags(DEP_FLAG_EQUAL), ("EQ", false));
        assert_eq!(dep_flags(0), ("", false));
        assert_eq!(dep_flags(DEP_FLAG_PREREQ), ("", true));
        assert_eq!(
            dep_flags(DEP_FLAG_EQUAL | DEP_FLAG_PREREQ),
            ("EQ", true)
        );
    }

    #[test]
    fn test_parse_evr() {
        assert_eq!(parse_evr(""), (0, String::new(), String::new()));
        assert_eq!(parse_evr("1.0"), (0, "1.0".to_string(), String::new()));
        assert_eq!(
            parse_evr("1.0-2.el9"),
            (0, "1.0".to_string(), "2.el9".to_string())
        );
        assert_eq!(
            parse_evr("3:1.0-2"),
            (3, "1.0".to_string(), "2".to_string())
        );
        assert_eq!(parse_evr("bad:1.0"), (0, "1.0".to_string(), String::new()));
    }

    #[test]
    fn test_changelog_count_bounded_by_shortest_list() {
        let data = build_rpm(&[
            HeaderEntry::string(RPMTAG_NAME, "foo"),
            HeaderEntry::int32(RPMTAG_CHANGELOGTIME, &[1, 2, 3]),
            HeaderEntry::string_array(RPMTAG_CHANGELOGNAME, &["a", "b"]),
            HeaderEntry::string_array(RPMTAG_CHANGELOGTEXT, &["x", "y", "z"]),
        ]);
        let pkg = inspect_rpm(&data, 0, 0, ChecksumAlgorithm::Sha256, "foo.rpm").unwrap();
        assert_eq!(pkg.changelogs.len(), 2);
    }

    #[test]
    fn test_old_filenames_fallback() {
        let data = build_rpm(&[
            HeaderEntry::string(RPMTAG_NAME, "foo"),
            HeaderEntry::string_array(RPMTAG_OLDFILENAMES, &["/usr/bin/foo"]),
        ]);
        let pkg = inspect_rpm(&data, 0, 0, ChecksumAlgorithm::Sha256, "foo.rpm").unwrap();
        assert_eq!(pkg.files.len(), 1);
        assert_eq!(pkg.files[0].path, "/usr/bin/foo");
    }

    #[test]
    fn test_inspect_rejects_non_rpm() {
        let err = inspect_rpm(b"not an rpm", 0, 0, ChecksumAlgorithm::Sha256, "x.rpm").unwrap_err();
        assert!(matches!(err, crate::AppError::Parse(_)));
    }

    #[test]
    fn test_pkgid_uses_sha512_when_requested() {
        let data = full_rpm();
        let pkg = inspect_rpm(&data, 0, 0, ChecksumAlgorithm::Sha512, "x.rpm").unwrap();
        assert_eq!(pkg.pkgid.len(), 128);
        assert_eq!(pkg.checksum_type, "sha512");
    }
}
