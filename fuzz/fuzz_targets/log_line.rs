#![no_main]

use libfuzzer_sys::fuzz_target;
use tickprof::config::ProcessorConfig;
use tickprof::symbols::{FuncInfo, Result, SymbolTableProvider};
use tickprof::tick_processor::TickProcessor;

struct NoSymbols;

impl SymbolTableProvider for NoSymbols {
    fn load_symbols(&mut self, _lib_name: &str) -> Result<Vec<FuncInfo>> {
        Ok(Vec::new())
    }
}

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let config = ProcessorConfig::default();
    if let Ok(mut processor) = TickProcessor::new(&config, Box::new(NoSymbols)) {
        processor.process_log_chunk(&input);
        processor.finish();
        let _ = processor.statistics();
    }
});
