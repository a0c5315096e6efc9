use s7client::codec::{get_counter, get_date_time_at};
use s7client::{S7Client, S7MultiVar, S7_AREA_DB, S7_AREA_MK, S7_WL_BYTE, S7_WL_REAL};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let address = std::env::args().nth(1).unwrap_or_else(|| "192.168.0.100".to_string());
    let mut client = S7Client::new();
    let db_number: u16 = 100; // Must exist into the PLC

    match client.connect_s71200_1500(&address) {
        Ok(_) => {
            println!("Connected to PLC");
            println!("PDU negotiated: {} byte", client.pdu_length());
            println!("Job time (ms) : {:.3}", client.last_time());
        }
        Err(e) => {
            eprintln!("Connection failed: {}", e);
            return;
        }
    }

    // Reads 462 byte from DB100
    println!();
    println!("Attempt to read 462 byte from DB100");
    let mut read_buffer = vec![0u8; 462];
    match client.db_read(db_number, 0, &mut read_buffer) {
        Ok(_) => {
            println!("Success!");
            println!("Job time (ms) : {:.3}", client.last_time());
            println!("Chunks        : {}", client.chunks());
            println!("Data read:");
            for (i, chunk) in read_buffer.chunks(32).enumerate() {
                print!("{:04X}: ", i * 32); // Hex Offset
                for byte in chunk {
                    print!("{:02X} ", byte);
                }
                println!();
            }
        }
        Err(e) => eprintln!("Read failed: {}", e),
    }

    // Writes 1024 byte to DB100
    println!();
    println!("Attempt to write 1024 byte to DB100");
    let mut write_data = [0u8; 1024];
    for (i, val) in write_data.iter_mut().enumerate() {
        *val = (i % 256) as u8;
    }
    match client.db_write(db_number, 0, &write_data) {
        Ok(_) => {
            println!("Success!");
            println!("Job time (ms) : {:.3}", client.last_time());
            println!("Chunks        : {}", client.chunks());
        }
        Err(e) => eprintln!("Write failed: {}", e),
    }

    // Bits through symbolic addresses
    println!();
    println!("Attempt to toggle DB100.DBX16.0");
    match client.read_bit_at("DB100.DBX16.0") {
        Ok(value) => match client.write_bit_at("DB100.DBX16.0", !value) {
            Ok(_) => println!("Success! {} -> {}", value, !value),
            Err(e) => eprintln!("Write failed: {}", e),
        },
        Err(e) => eprintln!("Read failed: {}", e),
    }

    // Two variables in a single telegram
    println!();
    println!("Attempt to read DB100.DBB0..7 and MD0 together");
    let mut db_bytes = [0u8; 8];
    let mut md0 = [0u8; 4];
    {
        let mut mv = S7MultiVar::new(&mut client);
        let added = mv
            .add(S7_AREA_DB, S7_WL_BYTE, db_number, 0, 8, &mut db_bytes)
            .and_then(|_| mv.add(S7_AREA_MK, S7_WL_REAL, 0, 0, 1, &mut md0));
        match added.and_then(|_| mv.read()) {
            Ok(_) => {
                for (i, result) in mv.results().iter().enumerate() {
                    println!("Item {}      : {:?}", i, result);
                }
            }
            Err(e) => eprintln!("Multi read failed: {}", e),
        }
    }
    println!("MD0 (REAL)    : {}", s7client::codec::get_real_at(&md0, 0));

    // Counters
    let mut counters = [0u16; 4];
    if client.ct_read(0, &mut counters).is_ok() {
        let values: Vec<u16> = counters.iter().map(|c| get_counter(*c)).collect();
        println!("C0..C3        : {:?}", values);
    }

    // System info
    println!();
    match client.get_order_code() {
        Ok(oc) => println!("Order code    : {} V{}", oc.code, oc.version()),
        Err(e) => eprintln!("Order code failed: {}", e),
    }
    match client.get_cpu_info() {
        Ok(info) => {
            println!("Module type   : {}", info.module_type_name);
            println!("Serial number : {}", info.serial_number);
        }
        Err(e) => eprintln!("CPU info failed: {}", e),
    }
    match client.plc_get_status() {
        Ok(status) => println!("CPU status    : {:?}", status),
        Err(e) => eprintln!("Status failed: {}", e),
    }
    match client.get_plc_date_time() {
        Ok(dt) => println!("PLC clock     : {}", dt),
        Err(e) => eprintln!("Clock failed: {}", e),
    }

    // Raw date/time codec, 8 BCD bytes
    let raw = [0x25, 0x03, 0x09, 0x14, 0x05, 0x59, 0x12, 0x31];
    println!("BCD sample    : {}", get_date_time_at(&raw, 0));

    client.disconnect();
    println!();
    println!("Disconnected");
}
