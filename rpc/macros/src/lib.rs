use proc_macro::TokenStream;
use proc_macro_error::proc_macro_error;
use syn::parse_macro_input;
mod api;

///
/// Attribute macro declaring an RPC interface from a trait.
///
/// ```ignore
/// #[api]
/// pub trait Calculator {
///     fn add(&self, a: i32, b: i32) -> i32;
///     fn on_result(&self, callback: Callback<i32>);
/// }
/// ```
///
/// Expands to the original trait (with `Send + Sync` supertraits), an
/// `ApiInterface` implementation for `dyn Calculator` carrying the
/// operation table and vtable builder, and a `CalculatorApi` extension
/// trait implemented for `Api<dyn Calculator>` exposing one async
/// method per operation.
///
/// The wire name of the interface defaults to the snake_case trait
/// name and can be overridden with `#[api(name = "...")]`.
///
#[proc_macro_attribute]
#[proc_macro_error]
pub fn api(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = parse_macro_input!(attr as api::Args);
    let item = parse_macro_input!(item as syn::ItemTrait);
    api::expand(args, item).into()
}
