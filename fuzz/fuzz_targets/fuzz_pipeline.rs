#![no_main]

use libfuzzer_sys::fuzz_target;
use spinel_lower::RuntimeConf;
use spinel_parser::ParseOptions;

fuzz_target!(|data: &[u8]| {
    // Every module the frontend accepts must survive optimization and
    // lowering with valid IR.
    let Ok(mut shader) = spinel_parser::parse(data, &ParseOptions::default()) else {
        return;
    };
    spinel_opt::optimize(&mut shader);
    let _ = spinel_lower::lower_shader(&mut shader, &RuntimeConf::default());
    assert_eq!(spinel_ir::validate(&shader), Ok(()));
});
