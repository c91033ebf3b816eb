use launch_loader::dummy::{DummyChannel, DummyError, NoDelay};
use launch_loader::{ihex, Endpoint, Error, ImageError, Options, Programmer, State};

use pretty_assertions::assert_eq;

const INFO_24: [u8; 9] = [0xFF, 0x21, 0x00, 0xF0, 0x08, 0x00, 0x80, 0x00, 0x80];

// One block below the programmable region, one at its start and one
// a slot into the following row
const IMAGE: &str = "\
:040000001122330096
:020000040100F9
:04100000AABBCC00BB
:0412300001020300B4
:00000001FF
";

fn programmer(options: Options) -> Programmer<DummyChannel, NoDelay, DummyError> {
    Programmer::new(DummyChannel::new(&INFO_24), NoDelay, options)
}

fn packet(header: u8, command: [u8; 3]) -> Vec<u8> {
    let mut p = vec![header];
    p.extend_from_slice(&command);
    p.extend_from_slice(&[0xFF; 15]);
    p
}

#[test]
fn full_session() {
    let image = ihex::parse(IMAGE).unwrap();
    let mut p = programmer(Options::default());

    let n = p.run(image.iter().map(|(a, b)| (*a, b))).unwrap();
    assert_eq!(n, 2);
    assert_eq!(p.state(), State::Locked);

    let d = p.descriptor().unwrap();
    assert_eq!(d.program_base_row, 0x8008);
    assert_eq!(d.starting_address(), 0x0100_1000);

    let expected = vec![
        (Endpoint::Command, vec![0x00]),
        (Endpoint::Command, vec![0x03]),
        (Endpoint::Data, vec![0x00]),
        (Endpoint::Command, vec![0x05]),
        (Endpoint::Data, vec![0x00]),
        (Endpoint::Command, vec![0x0A]),
        (Endpoint::Data, vec![0x00]),
        (Endpoint::Data, packet(0x00, [0xAA, 0xBB, 0xCC])),
        (Endpoint::Data, packet(0x01, [0x01, 0x02, 0x03])),
        (Endpoint::Command, vec![0x0D]),
        (Endpoint::Data, vec![0x4F, 0x4B]),
    ];

    assert_eq!(p.channel().writes(), &expected[..]);
}

#[test]
fn plan_rows() {
    let image = ihex::parse(IMAGE).unwrap();
    let mut p = programmer(Options::default());
    p.flash_info().unwrap();

    let packets: Vec<_> = p
        .plan(image)
        .unwrap()
        .map(|p| p.unwrap())
        .map(|p| (p.row, p.line, p.toggle()))
        .collect();

    assert_eq!(packets, vec![(0x8008, 0, false), (0x8009, 1, false)]);
}

#[test]
fn no_lock() {
    let image = ihex::parse(IMAGE).unwrap();
    let options = Options {
        no_lock: true,
        ..Options::default()
    };
    let mut p = programmer(options);

    p.run(image).unwrap();

    assert_eq!(p.state(), State::Programmed);
    assert_eq!(
        p.channel().writes().last(),
        Some(&(Endpoint::Data, packet(0x01, [0x01, 0x02, 0x03])))
    );
}

#[test]
fn bad_padding_stops_session() {
    let text = "\
:020000040100F9
:0400000001020305F1
:00000001FF
";
    // Place the malformed block inside the programmable region
    let mut image = ihex::parse(text).unwrap();
    let block = image.remove(&0x0100_0000).unwrap();
    image.insert(0x0100_1000, block);

    let mut p = programmer(Options::default());

    match p.run(image) {
        Err(Error::MalformedImage(ImageError::Padding { address, value })) => {
            assert_eq!(address, 0x0100_1003);
            assert_eq!(value, 0x05);
        }
        r => panic!("unexpected result: {:?}", r),
    }

    // No packets or lock were sent
    assert_eq!(p.state(), State::Described);
    assert_eq!(p.channel().data_writes().count(), 1);
}
