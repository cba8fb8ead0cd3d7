#![no_main]

use libfuzzer_sys::fuzz_target;
use room_sync::room::RoomRecord;
use room_sync::store::room_from_value;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = serde_json::from_slice::<serde_json::Value>(data) else {
        return;
    };

    // Any stored `currentRoom` value must decode without panicking, and only
    // `null` means "no room".
    let room = room_from_value(&value);
    assert_eq!(room.is_none(), value.is_null());

    // Room records written by other clients are untrusted input too.
    if let Ok(record) = serde_json::from_value::<RoomRecord>(value) {
        let _ = serde_json::to_value(&record);
    }
});
