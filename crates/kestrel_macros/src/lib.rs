use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, ItemFn};

/// Automatically profile a function when `perf_stats` feature is enabled.
///
/// This macro wraps the function body with timing code that logs
/// execution time on function exit. Compiles to nothing when the
/// `perf_stats` feature is disabled.
///
/// # Features
/// - Logs when duration exceeds the threshold (default 1ms)
/// - Uses `tracing::info!` logging instead of println
/// - Zero-cost abstraction when feature is disabled
///
/// # Example
/// ```ignore
/// #[profile]
/// pub fn rebuild_buffer(&mut self, batch: &EntityBatch) {
///     // ... work ...
/// }
/// ```
///
/// # Optional Parameters
/// ```ignore
/// #[profile(2)]  // Custom threshold in milliseconds
/// pub fn expensive_function() { ... }
/// ```
#[proc_macro_attribute]
pub fn profile(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);

    // Parse optional threshold parameter
    let threshold_ms: u128 = if attr.is_empty() {
        1
    } else {
        attr.to_string().parse().unwrap_or(1)
    };

    let attrs = &input.attrs;
    let vis = &input.vis;
    let sig = &input.sig;
    let block = &input.block;
    let fn_name_str = sig.ident.to_string();

    let profile_guard_def = quote! {
        struct ProfileGuard {
            name: &'static str,
            start: std::time::Instant,
        }
        impl Drop for ProfileGuard {
            fn drop(&mut self) {
                let elapsed = self.start.elapsed();
                if elapsed.as_millis() > #threshold_ms {
                    tracing::info!("[PERF] {}: {:?}", self.name, elapsed);
                }
            }
        }
        ProfileGuard {
            name: #fn_name_str,
            start: std::time::Instant::now(),
        }
    };

    let output = quote! {
        #(#attrs)*
        #vis #sig {
            #[cfg(feature = "perf_stats")]
            let _profile_timer = {
                #profile_guard_def
            };

            #block
        }
    };

    output.into()
}
