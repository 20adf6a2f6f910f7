use assert_matches::assert_matches;

use mcs_archive::error::ArchiveError;
use mcs_archive::keys::{
    self, ProductId, ProfileId, RowId, decode_profile_key, decode_row_key, encode_profile_key,
    encode_row_key,
};

#[test]
fn profile_and_row_ids_round_trip() {
    for profid in [
        "2006091512_DDR.TAB:0",
        "2006091512_DDR.TAB:17",
        "2018123123_DDR.TAB:9999",
    ] {
        let key = encode_profile_key(profid).unwrap();
        assert_eq!(decode_profile_key(key).unwrap(), profid);
    }
    for rowid in [
        "2006091512_DDR.TAB:0:0",
        "2006091512_DDR.TAB:17:104",
        "2018123123_DDR.TAB:9999:55",
    ] {
        let key = encode_row_key(rowid).unwrap();
        assert_eq!(decode_row_key(key).unwrap(), rowid);
    }
}

#[test]
fn row_key_divides_down_to_its_profile() {
    let profile: ProfileId = "2007030106_DDR.TAB:12".parse().unwrap();
    for level in [0, 1, 104] {
        let row = profile.row(level).unwrap();
        assert_eq!(row.key() / 1000, profile.key());
        assert_eq!(keys::profile_of_row(row.key()), profile.key());
        assert_eq!(row.profile_key(), profile.key());
    }
}

#[test]
fn packed_keys_follow_the_date() {
    let product: ProductId = "2007030106_DDR.TAB".parse().unwrap();
    assert_eq!(product.key(), 2007030106);
    assert_eq!(product.year(), 2007);
    assert_eq!(keys::day_decile(product.key()), 2007030);
    let profile = product.profile(3).unwrap();
    assert_eq!(profile.key(), 2007030106_0003);
    assert_eq!(keys::year_of_profile(profile.key()), 2007);
    assert_eq!(ProfileId::from_key(profile.key()).unwrap(), profile);
    assert_eq!(RowId::from_key(20070301060003_104).unwrap().as_str(), "2007030106_DDR.TAB:3:104");
}

#[test]
fn malformed_keys_are_rejected() {
    for bad in [
        "2007030106_DDR.TAB",
        "2007030106_DDR.TAB:",
        "2007030106_DDR.TAB:01",
        "2007030106_DDR.TAB:-1",
        "2007030106_DDR.TAB:10000",
        "200703010_DDR.TAB:1",
        "2007030106.TAB:1",
    ] {
        assert_matches!(
            encode_profile_key(bad),
            Err(ArchiveError::MalformedKey { .. }),
            "{bad}"
        );
    }
    for bad in [
        "2007030106_DDR.TAB:1",
        "2007030106_DDR.TAB:1:105",
        "2007030106_DDR.TAB:1:007",
        "2007030106_DDR.TAB:1:x",
    ] {
        assert_matches!(
            encode_row_key(bad),
            Err(ArchiveError::MalformedKey { .. }),
            "{bad}"
        );
    }
    assert_matches!(decode_row_key(-1), Err(ArchiveError::MalformedKey { .. }));
    assert_matches!(
        decode_row_key(2007030106_0000_105),
        Err(ArchiveError::MalformedKey { .. })
    );
}
