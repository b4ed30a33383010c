use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::{parse_macro_input, Expr, Token};

struct ServiceRegistrationArgs {
    name: Expr,
    address: Expr,
    port: Expr,
}

impl Parse for ServiceRegistrationArgs {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Expr = input.parse()?;
        input.parse::<Token![,]>()?;
        let address: Expr = input.parse()?;
        input.parse::<Token![,]>()?;
        let port: Expr = input.parse()?;
        input.parse::<Option<Token![,]>>()?;

        Ok(ServiceRegistrationArgs {
            name,
            address,
            port,
        })
    }
}

/// Macro to bootstrap registration with the configured service registry
///
/// Arguments are the service name, the advertised address and the port; any
/// expressions of the right types are accepted. Registry settings come from
/// the environment.
///
/// # Example
/// ```ignore
/// use registry_client::register_service;
///
/// #[tokio::main]
/// async fn main() -> registry_client::Result<()> {
///     let (lifecycle, instance) = register_service!("my-service", "localhost", 8080).await?;
///     tokio::signal::ctrl_c().await.ok();
///     lifecycle.unregister().await
/// }
/// ```
#[proc_macro]
pub fn register_service(input: TokenStream) -> TokenStream {
    let args = parse_macro_input!(input as ServiceRegistrationArgs);

    let name = args.name;
    let address = args.address;
    let port = args.port;

    let expanded = quote! {
        ::registry_client::bootstrap_service(#name, #address, #port)
    };

    TokenStream::from(expanded)
}
