//! Gadget post-processing scenarios beyond `gadget.rs`'s own unit
//! tests: multi-volume gadgets (no synthetic rootfs), and sequential
//! offset accumulation across structures that mix explicit and
//! implicit offsets.

use ubuntu_image_core::gadget::{parse_and_post_process, volume_order, Content, Role};

#[test]
fn multi_volume_gadget_does_not_synthesize_rootfs() {
	let yaml = r#"
volumes:
  pc:
    bootloader: grub
    structure:
      - name: mbr
        role: mbr
        type: mbr
        size: 440
  recovery:
    structure:
      - name: seed
        role: system-seed
        filesystem: vfat
        type: "0C"
        size: 1048576
"#;
	let info = parse_and_post_process(yaml.as_bytes()).unwrap();
	assert_eq!(info.len(), 2);
	for volume in info.values() {
		assert!(!volume.structures.iter().any(|s| s.role() == Role::SystemData));
	}
	assert_eq!(volume_order(&info), vec!["pc".to_owned(), "recovery".to_owned()]);
}

#[test]
fn system_seed_without_label_defaults_to_ubuntu_seed() {
	let yaml = r#"
volumes:
  pc:
    structure:
      - name: seed
        role: system-seed
        filesystem: vfat
        type: "0C"
        size: 1048576
"#;
	let info = parse_and_post_process(yaml.as_bytes()).unwrap();
	let seed = &info["pc"].structures[0];
	assert_eq!(seed.filesystem_label.as_deref(), Some("ubuntu-seed"));
}

#[test]
fn implicit_offsets_accumulate_sequentially_after_explicit_ones() {
	let yaml = r#"
volumes:
  pc:
    structure:
      - name: mbr
        role: mbr
        type: mbr
        offset: 0
        size: 440
      - name: bios-boot
        type: "21686148-6449-6E6F-744E-656564454649"
        size: 1048576
      - name: efi
        role: system-boot
        filesystem: vfat
        type: "EF,C12A7328-F81F-11D2-BA4B-00A0C93EC93B"
        size: 52428800
"#;
	let info = parse_and_post_process(yaml.as_bytes()).unwrap();
	let structures = &info["pc"].structures;

	assert_eq!(structures[0].offset, Some(0));
	assert_eq!(structures[1].offset, Some(440));
	assert_eq!(structures[2].offset, Some(440 + 1_048_576));

	// a rootfs structure is missing, so a synthetic system-data
	// structure is appended right after the last real one
	let synth = structures.last().unwrap();
	assert_eq!(synth.role(), Role::SystemData);
	assert_eq!(synth.offset, Some(440 + 1_048_576 + 52_428_800));
}

#[test]
fn rootfs_prefix_is_only_rewritten_on_system_boot_structures() {
	let yaml = r#"
volumes:
  pc:
    structure:
      - name: seed
        role: system-seed
        filesystem: vfat
        type: "0C"
        size: 1048576
        content:
          - source: "rootfs:/boot/"
            target: /
"#;
	let info = parse_and_post_process(yaml.as_bytes()).unwrap();
	let seed = &info["pc"].structures[0];
	let Content::Source { source, .. } = &seed.content[0] else { panic!("expected source content") };
	assert_eq!(source, "rootfs:/boot/", "only system-boot structures get the rewrite");
}
